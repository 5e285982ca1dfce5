//! Remote session client
//!
//! Maintains the room session by polling: one outstanding network action at
//! a time, drawn from an ordered queue. While not joined, only `join`
//! actions go out (and are coalesced); everything else waits at the front.
//! While joined and idle, a `recv` is synthesized. Quiet rooms step the
//! poll interval up toward a ceiling; any inbound traffic snaps it back.
//!
//! Failure handling keeps "what to do next" separate from "how many
//! failures have occurred": transient transport errors retry in-line with a
//! fixed delay, protocol errors reset the session and trigger a bounded
//! rejoin, and either budget running out fires the fatal shutdown signal
//! exactly once.

mod api;

pub use api::{HttpRoomApi, RoomApi, TransportError};

use crate::shutdown::ShutdownHandle;
use roomcast_common::config::RoomConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Outbound actions, processed strictly in FIFO order apart from the join
/// gating rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Join,
    Recv,
    Send(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unjoined,
    Joining,
    Active,
}

/// Polling agent for the room endpoint
pub struct SessionClient<A: RoomApi> {
    api: A,
    config: RoomConfig,

    phase: Phase,
    room_key: Option<String>,
    actions: VecDeque<Action>,
    join_queued: bool,
    join_attempts: u32,
    empty_recvs: u32,
    current_interval: Duration,
    next_delay: Duration,
    ever_joined: bool,

    inbound: mpsc::Sender<String>,
    shutdown: ShutdownHandle,
}

impl<A: RoomApi> SessionClient<A> {
    pub fn new(
        api: A,
        config: RoomConfig,
        inbound: mpsc::Sender<String>,
        shutdown: ShutdownHandle,
    ) -> Self {
        let current_interval = config.poll_interval();
        Self {
            api,
            config,
            phase: Phase::Unjoined,
            room_key: None,
            actions: VecDeque::new(),
            join_queued: false,
            join_attempts: 0,
            empty_recvs: 0,
            current_interval,
            // the first action (the initial join) goes out immediately
            next_delay: Duration::ZERO,
            ever_joined: false,
            inbound,
            shutdown,
        }
    }

    /// Poll until stopped or a fatal condition fires. Outbound messages
    /// arriving on `outbound` become `send` actions.
    pub async fn run(mut self, mut outbound: mpsc::Receiver<String>, mut stop: watch::Receiver<bool>) {
        info!("joining room '{}'", self.config.room_name);
        self.enqueue_join();

        loop {
            let deadline = tokio::time::Instant::now() + self.next_delay;
            let mut outbound_open = true;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = stop.changed() => return,
                    message = outbound.recv(), if outbound_open => match message {
                        Some(message) => self.actions.push_back(Action::Send(message)),
                        None => outbound_open = false,
                    },
                }
            }

            if *stop.borrow() || self.shutdown.is_fired() {
                return;
            }
            self.step().await;
            if self.shutdown.is_fired() {
                return;
            }
        }
    }

    /// Queue a join unless one is already queued or in flight.
    fn enqueue_join(&mut self) {
        if self.join_queued {
            debug!("suppressing superfluous join action");
            return;
        }
        self.join_queued = true;
        self.actions.push_back(Action::Join);
    }

    /// Dispatch at most one action, then decide the delay before the next.
    async fn step(&mut self) {
        self.next_delay = self.config.poll_interval();

        let action = match self.actions.pop_front() {
            Some(action) => action,
            // nothing queued: read new messages if we are joined
            None if self.phase == Phase::Active => Action::Recv,
            None => return,
        };

        match &action {
            Action::Join => {
                self.join_queued = false;
                self.phase = Phase::Joining;
            }
            _ if self.phase != Phase::Active => {
                // not ready to execute; wait at the front until joined
                self.actions.push_front(action);
                return;
            }
            _ => {}
        }

        let was_recv = action == Action::Recv;
        let Some(body) = self.execute_with_retry(&action).await else {
            return;
        };
        self.process_response(&action, &body).await;

        // quiet room: step the interval toward the ceiling
        if was_recv && self.empty_recvs >= self.config.empty_polls_before_throttle() {
            if self.current_interval < self.config.max_poll_interval() {
                self.current_interval = (self.current_interval + self.config.throttle_step())
                    .min(self.config.max_poll_interval());
                debug!("throttling room polling to {:?}", self.current_interval);
            }
            self.next_delay = self.current_interval;
        }
    }

    /// Execute one action, retrying transient transport failures in-line.
    /// Returns None after firing the fatal signal when the budget runs out.
    async fn execute_with_retry(&mut self, action: &Action) -> Option<String> {
        let mut attempts_remaining = self.config.retry_count;
        loop {
            let room_key = self.room_key.as_deref().unwrap_or("");
            let result = match action {
                Action::Join => self.api.join().await,
                Action::Recv => self.api.recv(room_key).await,
                Action::Send(message) => self.api.send(room_key, message).await,
            };

            match result {
                Ok(body) => return Some(body),
                Err(e) => {
                    attempts_remaining = attempts_remaining.saturating_sub(1);
                    if attempts_remaining == 0 {
                        self.shutdown
                            .fire(format!("room endpoint unreachable: {}", e));
                        return None;
                    }
                    warn!(
                        "transport error ({}); retrying in {:?} ({} attempts remaining)",
                        e,
                        self.config.retry_delay(),
                        attempts_remaining
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    /// Interpret a response body. Every response starts with `OK`; anything
    /// else is a protocol failure that resets the session.
    async fn process_response(&mut self, action: &Action, body: &str) {
        let body = body.replace('\r', "");
        let mut lines = body.split('\n');

        if lines.next().map(str::trim) != Some("OK") {
            warn!("non-OK response from room endpoint; session lost");
            self.room_key = None;
            self.phase = Phase::Unjoined;
            self.join_or_shutdown("protocol error from room endpoint").await;
            return;
        }

        match action {
            Action::Join => match lines.next().map(str::trim).filter(|key| !key.is_empty()) {
                Some(key) => {
                    self.room_key = Some(key.to_string());
                    self.phase = Phase::Active;
                    self.join_attempts = 0;
                    info!("joined room '{}'; starting receive polling", self.config.room_name);
                    self.on_joined();
                }
                None => {
                    self.room_key = None;
                    self.phase = Phase::Unjoined;
                    self.join_or_shutdown("join response missing session key").await;
                }
            },
            Action::Recv => {
                let forwarded = self.forward_messages(lines).await;
                if forwarded > 0 {
                    self.empty_recvs = 0;
                    self.current_interval = self.config.poll_interval();
                } else {
                    self.empty_recvs += 1;
                }
            }
            Action::Send(_) => {}
        }
    }

    /// Queue the post-join room commands and the ready/rejoin notice.
    fn on_joined(&mut self) {
        for command in self.config.join_commands.clone() {
            self.actions.push_back(Action::Send(command));
        }
        let notice = if self.ever_joined {
            self.config.rejoin_message.clone()
        } else {
            self.config.ready_message.clone()
        };
        self.actions.push_back(Action::Send(notice));
        self.ever_joined = true;
    }

    /// Filter inbound lines and forward what remains. Control traffic is
    /// dropped except for private messages addressed to us; our own echo is
    /// dropped.
    async fn forward_messages<'a>(&mut self, lines: impl Iterator<Item = &'a str>) -> usize {
        let self_prefix = format!("{}:", self.config.app_username);
        let mut forwarded = 0;

        for line in lines {
            if line.is_empty() {
                continue;
            }
            if line.starts_with(&self.config.control_marker) {
                if let Some(index) = line.find(&self.config.privmsg_marker) {
                    let message = line[index + self.config.privmsg_marker.len()..].trim();
                    if !message.is_empty() {
                        self.forward(message).await;
                        forwarded += 1;
                    }
                }
                continue;
            }
            if line.starts_with(&self_prefix) {
                continue;
            }
            self.forward(line).await;
            forwarded += 1;
        }
        forwarded
    }

    async fn forward(&self, line: &str) {
        if self.inbound.send(line.to_string()).await.is_err() {
            debug!("inbound sink closed; dropping message");
        }
    }

    /// Re-attempt the join within the bounded budget, or give up for good.
    async fn join_or_shutdown(&mut self, reason: &str) {
        if self.join_attempts < self.config.rejoin_attempts {
            self.join_attempts += 1;
            let remaining = self.config.rejoin_attempts - self.join_attempts;
            warn!("{}; attempting to join ({} attempts remaining)", reason, remaining);
            self.enqueue_join();
        } else {
            self.shutdown.fire(format!("failed to rejoin after {}", reason));
        }
    }
}
