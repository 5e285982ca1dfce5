//! Request queue and playback scheduler
//!
//! A single task owns the FIFO of pending requests, the currently-playing
//! one, and the player backend. Commands arrive on a channel; a periodic
//! tick re-evaluates the player state so a crashed or zombie subprocess is
//! noticed within one tick even without an explicit notification. Ticks
//! that land while a pass is in flight are skipped; the next tick catches
//! up.
//!
//! Blocking resolution never runs on this task: submissions are resolved on
//! a worker and come back through the command channel.

use crate::player::{PlayerBackend, PlayerMode, StartError};
use crate::request::{PlayRequest, RequestSource};
use crate::resolver::MediaResolver;
use crate::shutdown::ShutdownHandle;
use roomcast_common::config::PlayerConfig;
use roomcast_common::control::Command as PlayerCommand;
use roomcast_common::human_time;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Everything the scheduler reacts to besides its own tick
#[derive(Debug)]
pub enum SchedulerCommand {
    /// A new playback request; resolution happens on a worker
    Submit { sender: String, source: RequestSource },
    /// A resolution worker finished (the request may have failed)
    Queue(Box<PlayRequest>),
    /// Vote on the currently playing item
    Vote { sender: String, up: bool },
    /// Stop the currently playing item (owner or elevated)
    Stop { sender: String, elevated: bool },
    /// Seek by a relative number of seconds
    Seek {
        sender: String,
        delta_secs: i64,
        elevated: bool,
    },
    /// Jump to an absolute position (issued to the player as a seek)
    Jump {
        sender: String,
        target_secs: u64,
        elevated: bool,
    },
    /// Announce what is playing right now
    NowPlaying,
    /// Announce the queue contents
    ListQueue,
    /// Remove a queued item by 1-based position, or the sender's most
    /// recent item when no position is given
    Drop {
        sender: String,
        elevated: bool,
        position: Option<usize>,
    },
    /// The outbound stream id arrived; scheduling may begin
    StreamReady(String),
    /// Stop the player and end the scheduler task
    Shutdown,
}

/// Request queue / playback scheduler
pub struct Scheduler<B: PlayerBackend> {
    config: PlayerConfig,
    player: B,
    resolver: Arc<dyn MediaResolver>,
    queue: VecDeque<PlayRequest>,
    current: Option<PlayRequest>,
    stream_id: Option<String>,
    outbound: mpsc::Sender<String>,
    commands_tx: mpsc::Sender<SchedulerCommand>,
    shutdown: ShutdownHandle,
}

impl<B: PlayerBackend> Scheduler<B> {
    pub fn new(
        config: PlayerConfig,
        player: B,
        resolver: Arc<dyn MediaResolver>,
        outbound: mpsc::Sender<String>,
        commands_tx: mpsc::Sender<SchedulerCommand>,
        shutdown: ShutdownHandle,
    ) -> Self {
        Self {
            config,
            player,
            resolver,
            queue: VecDeque::new(),
            current: None,
            stream_id: None,
            outbound,
            commands_tx,
            shutdown,
        }
    }

    /// Run until [`SchedulerCommand::Shutdown`] (or the command channel
    /// closes), then stop the active player before returning.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>) {
        let mut tick = interval(self.config.tick_interval());
        // a tick landing while a pass is in flight is a no-op
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SchedulerCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                _ = tick.tick() => self.check_queue().await,
            }
        }

        info!("scheduler stopping; shutting down player");
        self.player.stop().await;
    }

    async fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Submit { sender, source } => self.spawn_resolution(sender, source),
            SchedulerCommand::Queue(request) => self.handle_queue(*request).await,
            SchedulerCommand::Vote { sender, up } => self.handle_vote(&sender, up).await,
            SchedulerCommand::Stop { sender, elevated } => {
                self.handle_stop(&sender, elevated).await
            }
            SchedulerCommand::Seek {
                sender,
                delta_secs,
                elevated,
            } => self.handle_seek(&sender, delta_secs, elevated).await,
            SchedulerCommand::Jump {
                sender,
                target_secs,
                elevated,
            } => self.handle_jump(&sender, target_secs, elevated).await,
            SchedulerCommand::NowPlaying => self.handle_now_playing().await,
            SchedulerCommand::ListQueue => self.handle_list_queue().await,
            SchedulerCommand::Drop {
                sender,
                elevated,
                position,
            } => self.handle_drop(&sender, elevated, position).await,
            SchedulerCommand::StreamReady(stream_id) => {
                if self.stream_id.is_none() {
                    info!("stream id '{}' received; scheduling begins", stream_id);
                    self.stream_id = Some(stream_id);
                    self.check_queue().await;
                }
            }
            SchedulerCommand::Shutdown => {}
        }
    }

    fn media_playing(&self) -> bool {
        self.player.mode() == Some(PlayerMode::Media) && self.current.is_some()
    }

    async fn announce(&self, message: &str) {
        if self.outbound.send(message.to_string()).await.is_err() {
            debug!("outbound sink closed; dropping announcement");
        }
    }

    /// Resolve a submission off-task and feed the result back through the
    /// command channel.
    fn spawn_resolution(&self, sender: String, source: RequestSource) {
        let resolver = Arc::clone(&self.resolver);
        let results = self.commands_tx.clone();
        tokio::spawn(async move {
            let worker = tokio::task::spawn_blocking(move || {
                let mut request = PlayRequest::new(sender, source);
                let _ = request.resolve(resolver.as_ref());
                request
            });
            match worker.await {
                Ok(request) => {
                    let _ = results.send(SchedulerCommand::Queue(Box::new(request))).await;
                }
                Err(e) => error!("resolution worker failed: {}", e),
            }
        });
    }

    async fn handle_queue(&mut self, request: PlayRequest) {
        if !request.ready {
            let reason = request
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            self.announce(&format!(
                "/msg {} couldn't queue your request &mdash; {}",
                request.sender, reason
            ))
            .await;
            return;
        }

        info!(
            "queuing request \"{}\" (source: {} | media: {})",
            request.title,
            request.source.original(),
            request.media_uri.as_deref().unwrap_or("-")
        );
        self.queue.push_back(request);

        if self.media_playing() {
            if let Some(request) = self.queue.back() {
                self.announce(&format!(
                    "/msg {} \"{}\" (from {}) &mdash; {} &mdash; added to queue (#{}).",
                    request.sender,
                    request.title,
                    request.source_site,
                    request.duration_label(),
                    self.queue.len()
                ))
                .await;
            }
        }
    }

    /// One scheduling pass over `(queue non-empty?, player mode)`.
    async fn check_queue(&mut self) {
        let Some(stream_id) = self.stream_id.clone() else {
            return;
        };

        let mut start_playback = false;
        match self.player.mode() {
            Some(mode) => {
                if !self.player.is_alive().await {
                    warn!("player process gone; restarting");
                    self.current = None;
                    start_playback = true;
                } else if mode == PlayerMode::Idle && !self.queue.is_empty() {
                    // requests waiting behind an idle player
                    self.player.stop().await;
                    start_playback = true;
                }
            }
            None => start_playback = true,
        }
        if !start_playback {
            return;
        }

        if self.queue.is_empty() {
            info!("request queue empty; idling");
            if let Err(e) = self.player.start_idle(&stream_id).await {
                self.handle_start_error(e, None).await;
            }
            return;
        }

        info!("dequeueing and playing next request");
        let Some(mut request) = self.queue.pop_front() else {
            return;
        };

        if request.is_stale(self.config.stale_media_age()) {
            warn!("media info stale; re-resolving");
            let resolver = Arc::clone(&self.resolver);
            let worker = tokio::task::spawn_blocking(move || {
                let _ = request.resolve(resolver.as_ref());
                request
            });
            request = match worker.await {
                Ok(request) => request,
                Err(e) => {
                    error!("resolution worker failed: {}", e);
                    return;
                }
            };
        }

        let media_uri = match request.media_uri.clone().filter(|_| request.ready) {
            Some(uri) => uri,
            None => {
                let reason = request
                    .error
                    .clone()
                    .unwrap_or_else(|| "no longer playable".to_string());
                warn!("request failed to update: {}", reason);
                self.announce(&format!(
                    "/msg {} error trying to play your request &mdash; {}",
                    request.sender, reason
                ))
                .await;
                // no implicit retry; the next tick reconsiders idling
                return;
            }
        };

        self.announce(&format!(
            "/me is now playing *\"{}\" (from {})* &mdash; {} &mdash; *for {}*",
            request.title,
            request.source_site,
            request.duration_label(),
            request.sender
        ))
        .await;

        match self
            .player
            .start_media(&stream_id, &media_uri, request.is_live)
            .await
        {
            Ok(()) => self.current = Some(request),
            Err(e) => self.handle_start_error(e, Some(&request)).await,
        }
    }

    async fn handle_start_error(&mut self, error: StartError, request: Option<&PlayRequest>) {
        if error.is_fatal() {
            self.shutdown.fire(format!("player startup failed: {}", error));
            return;
        }
        // recoverable: the player died before opening its socket
        if let Some(request) = request {
            self.announce(&format!(
                "/msg {} error trying to play your request &mdash; the player failed to start",
                request.sender
            ))
            .await;
        }
    }

    async fn handle_vote(&mut self, sender: &str, up: bool) {
        if !self.media_playing() {
            return;
        }

        let (applied, rating, title, site) = match self.current.as_mut() {
            Some(current) => {
                let applied = if up {
                    current.upvote(sender)
                } else {
                    current.downvote(sender)
                };
                (
                    applied,
                    current.rating(),
                    current.title.clone(),
                    current.source_site.clone(),
                )
            }
            None => return,
        };

        if applied {
            let verb = if up { "increased" } else { "decreased" };
            self.announce(&format!(
                "/me {} the rating of *\"{}\" (from {})* &mdash; to **{:+}** &mdash; *for {}*",
                verb, title, site, rating, sender
            ))
            .await;
        }

        // vote-out happens now, not on a later tick
        if rating < self.config.min_rating {
            info!("stopping playback for low rating: \"{}\" ({})", title, rating);
            self.announce("/me stopped the player &mdash; item voted out.")
                .await;
            self.player.stop().await;
            self.current = None;
        }
    }

    async fn handle_stop(&mut self, sender: &str, elevated: bool) {
        if !self.media_playing() {
            return;
        }
        let Some(current) = self.current.as_ref() else {
            return;
        };
        if current.sender != sender && !elevated {
            return;
        }

        info!(
            "{} media: \"{}\" ({})",
            if elevated { "halting" } else { "stopping" },
            current.title,
            current.source.original()
        );
        self.player.stop().await;
        self.current = None;
    }

    async fn handle_seek(&mut self, sender: &str, delta_secs: i64, elevated: bool) {
        if !self.seek_allowed(sender, elevated) {
            return;
        }

        match self.player.command(PlayerCommand::Seek(delta_secs)).await {
            Ok(reply) if reply.is_ok() => {}
            Ok(_) => warn!("seek failed: {} seconds (from {})", delta_secs, sender),
            Err(e) => warn!("seek command not acknowledged: {}", e),
        }
    }

    async fn handle_jump(&mut self, sender: &str, target_secs: u64, elevated: bool) {
        if !self.seek_allowed(sender, elevated) {
            return;
        }

        // the player only understands relative seeks
        let position = match self.player.command(PlayerCommand::GetPos).await {
            Ok(reply) if reply.is_ok() => match reply.payload::<(u64, u64)>() {
                Ok((position, _duration)) => position,
                Err(e) => {
                    warn!("jump failed: bad position payload ({})", e);
                    return;
                }
            },
            Ok(_) => {
                warn!("jump failed: no position available");
                return;
            }
            Err(e) => {
                warn!("getpos command not acknowledged: {}", e);
                return;
            }
        };

        let delta = target_secs as i64 - position as i64;
        if delta == 0 {
            return;
        }
        match self.player.command(PlayerCommand::Seek(delta)).await {
            Ok(reply) if reply.is_ok() => {}
            Ok(_) => warn!("jump failed: {} seconds (from {})", target_secs, sender),
            Err(e) => warn!("seek command not acknowledged: {}", e),
        }
    }

    fn seek_allowed(&self, sender: &str, elevated: bool) -> bool {
        if !self.media_playing() {
            return false;
        }
        let Some(current) = self.current.as_ref() else {
            return false;
        };
        if current.is_live {
            return false;
        }
        current.sender == sender || elevated
    }

    async fn handle_now_playing(&mut self) {
        if !self.media_playing() {
            return;
        }
        let Some(current) = self.current.as_ref().cloned() else {
            return;
        };

        let timestamp = if current.is_live {
            match self.player.command(PlayerCommand::GetLivePos).await {
                Ok(reply) if reply.is_ok() => match reply.payload::<u64>() {
                    Ok(position) => format!("LIVE for {}", human_time::format_clock(position)),
                    Err(_) => "~".to_string(),
                },
                _ => "~".to_string(),
            }
        } else {
            match self.player.command(PlayerCommand::GetPos).await {
                Ok(reply) if reply.is_ok() => match reply.payload::<(u64, u64)>() {
                    Ok((position, duration)) => format!(
                        "{}/{}",
                        human_time::format_clock(position),
                        human_time::format_clock(duration)
                    ),
                    Err(_) => "~".to_string(),
                },
                _ => "~".to_string(),
            }
        };

        self.announce(&format!(
            "/me is playing *\"{}\" (from {})* &mdash; {} &mdash; rated **{}** &mdash; *for {}*",
            current.title,
            current.source_site,
            timestamp,
            current.rating(),
            current.sender
        ))
        .await;
        self.announce(&format!(
            "/me also has a *direct link &mdash;* {}",
            current.source.original()
        ))
        .await;
    }

    async fn handle_list_queue(&mut self) {
        if self.queue.is_empty() {
            self.announce("/me has no items queued.").await;
            return;
        }

        let items: Vec<String> = self
            .queue
            .iter()
            .enumerate()
            .map(|(index, request)| {
                format!(
                    "**{}.** *{}* &mdash; for {}",
                    index + 1,
                    request.title,
                    request.sender
                )
            })
            .collect();
        self.announce(&format!("/me has queued: {}", items.join(", ")))
            .await;
    }

    async fn handle_drop(&mut self, sender: &str, elevated: bool, position: Option<usize>) {
        if self.queue.is_empty() {
            return;
        }

        let index = match position {
            Some(position) if position >= 1 && position <= self.queue.len() => position - 1,
            Some(_) => return,
            // no position given: the sender's most recent entry
            None => match self.queue.iter().rposition(|r| r.sender == sender) {
                Some(index) => index,
                None => return,
            },
        };

        if self.queue[index].sender != sender && !elevated {
            return;
        }

        if let Some(removed) = self.queue.remove(index) {
            self.announce(&format!(
                "/me has dropped from the queue: {}. &mdash; *{}*",
                index + 1,
                removed.title
            ))
            .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{MediaInfo, ResolveError};
    use roomcast_common::control::Reply;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    // ----- player stub -----

    #[derive(Default)]
    struct StubState {
        mode: Option<PlayerMode>,
        alive: bool,
        started: Vec<(String, Option<String>, bool)>,
        stops: usize,
        seeks: Vec<i64>,
        position: (u64, u64),
        fail_media_exited: bool,
        fail_media_fatal: bool,
    }

    #[derive(Clone)]
    struct StubPlayer(Arc<Mutex<StubState>>);

    impl StubPlayer {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(StubState::default())))
        }

        fn state(&self) -> std::sync::MutexGuard<'_, StubState> {
            self.0.lock().unwrap()
        }
    }

    impl PlayerBackend for StubPlayer {
        fn mode(&self) -> Option<PlayerMode> {
            self.state().mode
        }

        async fn start_idle(&mut self, stream_id: &str) -> Result<(), StartError> {
            let mut state = self.state();
            state.started.push((stream_id.to_string(), None, false));
            state.mode = Some(PlayerMode::Idle);
            state.alive = true;
            Ok(())
        }

        async fn start_media(
            &mut self,
            stream_id: &str,
            media_uri: &str,
            live: bool,
        ) -> Result<(), StartError> {
            let mut state = self.state();
            if state.fail_media_exited {
                return Err(StartError::PlayerExited);
            }
            if state.fail_media_fatal {
                return Err(StartError::SocketTimeout);
            }
            state
                .started
                .push((stream_id.to_string(), Some(media_uri.to_string()), live));
            state.mode = Some(PlayerMode::Media);
            state.alive = true;
            Ok(())
        }

        async fn is_alive(&mut self) -> bool {
            let mut state = self.state();
            if !state.alive {
                state.mode = None;
            }
            state.alive
        }

        async fn stop(&mut self) {
            let mut state = self.state();
            state.stops += 1;
            state.mode = None;
            state.alive = false;
        }

        async fn command(
            &mut self,
            command: PlayerCommand,
        ) -> Result<Reply, roomcast_common::control::ControlError> {
            let mut state = self.state();
            Ok(match command {
                PlayerCommand::GetPos => Reply::ok_with(state.position),
                PlayerCommand::GetLivePos => Reply::ok_with(state.position.0),
                PlayerCommand::Seek(delta) => {
                    state.seeks.push(delta);
                    Reply::ok()
                }
                _ => Reply::ok(),
            })
        }
    }

    // ----- resolver stubs -----

    struct FixedResolver {
        info: MediaInfo,
        calls: AtomicUsize,
    }

    impl FixedResolver {
        fn new(info: MediaInfo) -> Self {
            Self {
                info,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl MediaResolver for FixedResolver {
        fn resolve(&self, _source: &RequestSource) -> Result<MediaInfo, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.info.clone())
        }
    }

    fn media_info(url: &str, duration_secs: u64) -> MediaInfo {
        MediaInfo {
            media_url: url.to_string(),
            title: format!("title for {}", url),
            duration_secs,
            is_live: false,
            source_site: "example.com".to_string(),
        }
    }

    fn test_config(min_rating: i64) -> PlayerConfig {
        PlayerConfig {
            playcmd: PathBuf::from("/bin/true"),
            control_socket: PathBuf::from("/tmp/roomcast-test.sock"),
            control_key: "k".to_string(),
            socket_wait_timeout_ms: 100,
            socket_wait_interval_ms: 10,
            tick_interval_ms: 50,
            min_rating,
            stale_media_age_secs: 3_600,
        }
    }

    struct Harness {
        scheduler: Scheduler<StubPlayer>,
        stub: StubPlayer,
        outbound: mpsc::Receiver<String>,
        shutdown_rx: mpsc::Receiver<String>,
        resolver: Arc<FixedResolver>,
    }

    fn harness(min_rating: i64) -> Harness {
        let stub = StubPlayer::new();
        let resolver = Arc::new(FixedResolver::new(media_info("https://cdn.example.com/a.mp4", 120)));
        let (outbound_tx, outbound) = mpsc::channel(64);
        let (commands_tx, _commands_rx) = mpsc::channel(64);
        let (shutdown, shutdown_rx) = ShutdownHandle::new();

        let scheduler = Scheduler::new(
            test_config(min_rating),
            stub.clone(),
            resolver.clone(),
            outbound_tx,
            commands_tx,
            shutdown,
        );

        Harness {
            scheduler,
            stub,
            outbound,
            shutdown_rx,
            resolver,
        }
    }

    fn ready_request(sender: &str, url: &str, duration_secs: u64) -> PlayRequest {
        let mut request = PlayRequest::new(sender, RequestSource::Page(url.to_string()));
        let resolver = FixedResolver::new(media_info(url, duration_secs));
        request.resolve(&resolver).unwrap();
        request
    }

    fn drain(outbound: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_idles_when_queue_empty() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;

        let state = h.stub.state();
        assert_eq!(state.started, vec![("stream-1".to_string(), None, false)]);
        assert_eq!(state.mode, Some(PlayerMode::Idle));
    }

    #[tokio::test]
    async fn test_fifo_dequeue_order() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;

        let a = ready_request("alice", "https://cdn.example.com/a.mp4", 120);
        let b = ready_request("bob", "https://cdn.example.com/b.mp4", 60);
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(a)))
            .await;
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(b)))
            .await;

        // idle player + non-empty queue: stop idle, start A
        h.scheduler.check_queue().await;
        {
            let state = h.stub.state();
            assert_eq!(state.stops, 1);
            assert_eq!(state.mode, Some(PlayerMode::Media));
            assert_eq!(
                state.started.last().unwrap().1.as_deref(),
                Some("https://cdn.example.com/a.mp4")
            );
        }
        assert_eq!(h.scheduler.queue.len(), 1);

        // position right after A starts: (0, 120)
        h.stub.state().position = (0, 120);
        h.scheduler.handle_command(SchedulerCommand::NowPlaying).await;
        let messages = drain(&mut h.outbound);
        assert!(messages.iter().any(|m| m.contains("0:00/2:00")));

        // A's player dies; next tick starts B
        h.stub.state().alive = false;
        h.scheduler.check_queue().await;
        let state = h.stub.state();
        assert_eq!(
            state.started.last().unwrap().1.as_deref(),
            Some("https://cdn.example.com/b.mp4")
        );
        assert!(h.scheduler.queue.is_empty());
    }

    #[tokio::test]
    async fn test_vote_out_stops_within_same_pass() {
        let mut h = harness(-1);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "alice",
                "https://cdn.example.com/a.mp4",
                120,
            ))))
            .await;
        h.scheduler.check_queue().await;
        assert!(h.scheduler.media_playing());

        let stops_before = h.stub.state().stops;
        h.scheduler
            .handle_command(SchedulerCommand::Vote {
                sender: "carol".into(),
                up: false,
            })
            .await;
        // -1 is not below the -1 floor yet
        assert_eq!(h.stub.state().stops, stops_before);
        assert!(h.scheduler.current.is_some());

        h.scheduler
            .handle_command(SchedulerCommand::Vote {
                sender: "dave".into(),
                up: false,
            })
            .await;
        // -2 < -1: stopped inside the vote handler, no tick needed
        assert_eq!(h.stub.state().stops, stops_before + 1);
        assert!(h.scheduler.current.is_none());

        let messages = drain(&mut h.outbound);
        assert!(messages.iter().any(|m| m.contains("voted out")));
    }

    #[tokio::test]
    async fn test_recoverable_start_error_reports_without_shutdown() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;
        h.stub.state().fail_media_exited = true;

        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "alice",
                "https://cdn.example.com/a.mp4",
                120,
            ))))
            .await;
        h.scheduler.check_queue().await;

        let messages = drain(&mut h.outbound);
        assert!(messages
            .iter()
            .any(|m| m.starts_with("/msg alice") && m.contains("failed to start")));
        assert!(h.shutdown_rx.try_recv().is_err());
        assert!(h.scheduler.current.is_none());
    }

    #[tokio::test]
    async fn test_fatal_start_error_fires_shutdown_once() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;
        h.stub.state().fail_media_fatal = true;

        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "alice",
                "https://cdn.example.com/a.mp4",
                120,
            ))))
            .await;
        h.scheduler.check_queue().await;

        assert!(h.shutdown_rx.try_recv().is_ok());
        assert!(h.shutdown_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drop_respects_ownership() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "bob",
                "https://cdn.example.com/b.mp4",
                60,
            ))))
            .await;

        h.scheduler
            .handle_command(SchedulerCommand::Drop {
                sender: "alice".into(),
                elevated: false,
                position: Some(1),
            })
            .await;
        assert_eq!(h.scheduler.queue.len(), 1);

        h.scheduler
            .handle_command(SchedulerCommand::Drop {
                sender: "alice".into(),
                elevated: true,
                position: Some(1),
            })
            .await;
        assert!(h.scheduler.queue.is_empty());
    }

    #[tokio::test]
    async fn test_drop_without_position_takes_senders_latest() {
        let mut h = harness(-3);
        for url in [
            "https://cdn.example.com/1.mp4",
            "https://cdn.example.com/2.mp4",
        ] {
            h.scheduler
                .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                    "alice", url, 60,
                ))))
                .await;
        }
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "bob",
                "https://cdn.example.com/3.mp4",
                60,
            ))))
            .await;

        h.scheduler
            .handle_command(SchedulerCommand::Drop {
                sender: "alice".into(),
                elevated: false,
                position: None,
            })
            .await;

        // alice's most recent entry (position 2) is gone; bob's untouched
        assert_eq!(h.scheduler.queue.len(), 2);
        assert!(h
            .scheduler
            .queue
            .iter()
            .all(|r| r.source.original() != "https://cdn.example.com/2.mp4"));
    }

    #[tokio::test]
    async fn test_stale_head_is_re_resolved() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;

        let mut request = ready_request("alice", "https://cdn.example.com/a.mp4", 120);
        request.set_resolved_at(Instant::now() - Duration::from_secs(7_200));
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(request)))
            .await;

        let calls_before = h.resolver.calls.load(Ordering::SeqCst);
        h.scheduler.check_queue().await;
        assert_eq!(h.resolver.calls.load(Ordering::SeqCst), calls_before + 1);
        assert!(h.scheduler.media_playing());
    }

    #[tokio::test]
    async fn test_jump_issues_relative_seek() {
        let mut h = harness(-3);
        h.scheduler
            .handle_command(SchedulerCommand::StreamReady("stream-1".into()))
            .await;
        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(ready_request(
                "alice",
                "https://cdn.example.com/a.mp4",
                120,
            ))))
            .await;
        h.scheduler.check_queue().await;
        h.stub.state().position = (30, 120);

        h.scheduler
            .handle_command(SchedulerCommand::Jump {
                sender: "alice".into(),
                target_secs: 90,
                elevated: false,
            })
            .await;
        assert_eq!(h.stub.state().seeks, vec![60]);

        // a non-owner without elevation gets nowhere
        h.scheduler
            .handle_command(SchedulerCommand::Seek {
                sender: "mallory".into(),
                delta_secs: 10,
                elevated: false,
            })
            .await;
        assert_eq!(h.stub.state().seeks, vec![60]);
    }

    #[tokio::test]
    async fn test_unready_request_is_reported_not_queued() {
        let mut h = harness(-3);
        let mut request = PlayRequest::new(
            "alice",
            RequestSource::Page("https://example.com/gone".to_string()),
        );
        request.error = Some("no playable media found".to_string());

        h.scheduler
            .handle_command(SchedulerCommand::Queue(Box::new(request)))
            .await;

        assert!(h.scheduler.queue.is_empty());
        let messages = drain(&mut h.outbound);
        assert!(messages
            .iter()
            .any(|m| m.starts_with("/msg alice couldn't queue")));
    }
}
