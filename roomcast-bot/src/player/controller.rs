//! Player process lifecycle
//!
//! Spawns the player subprocess, waits for its control socket with a
//! bounded deadline, detects crashes and zombies, and tears the process
//! down with a grace window for the pipeline to drain.

use crate::player::channel::ControlChannel;
use roomcast_common::config::PlayerConfig;
use roomcast_common::control::{Command, ControlError, Reply};
use std::io;
use thiserror::Error;
use tokio::process::{Child, Command as ProcessCommand};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// What the active player was started for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerMode {
    /// Idle card between requests
    Idle,
    /// Playing a queued request
    Media,
}

/// Player startup failures.
///
/// Everything except [`StartError::PlayerExited`] indicates an
/// unrecoverable local inconsistency and escalates to full shutdown.
#[derive(Debug, Error)]
pub enum StartError {
    /// The player binary could not be spawned at all
    #[error("failed to spawn player: {0}")]
    Spawn(io::Error),

    /// The player died before its control socket appeared; recoverable,
    /// reported to the requester as a playback error
    #[error("player exited before opening its control socket")]
    PlayerExited,

    /// The socket never appeared but the player is still running, i.e. it
    /// hung before binding
    #[error("timed out waiting for the control socket with the player still alive")]
    SocketTimeout,

    /// The post-connect `play` command was not acknowledged
    #[error("play command failed: {0}")]
    Ipc(ControlError),

    /// The player answered `play` with an error
    #[error("player rejected play: {0}")]
    Rejected(String),
}

impl StartError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StartError::PlayerExited)
    }
}

struct ActivePlayer {
    child: Child,
    channel: Option<ControlChannel>,
    mode: PlayerMode,
}

/// Narrow player interface the scheduler drives.
///
/// The production implementation is [`PlayerController`]; tests substitute
/// a scripted backend.
#[allow(async_fn_in_trait)]
pub trait PlayerBackend: Send {
    /// Mode of the active player, or None when no subprocess is tracked
    fn mode(&self) -> Option<PlayerMode>;

    /// Spawn an idle-mode player for the stream
    async fn start_idle(&mut self, stream_id: &str) -> Result<(), StartError>;

    /// Spawn a media-mode player for the stream
    async fn start_media(
        &mut self,
        stream_id: &str,
        media_uri: &str,
        live: bool,
    ) -> Result<(), StartError>;

    /// Probe the subprocess; clears tracking (and any zombie socket file)
    /// when it has exited
    async fn is_alive(&mut self) -> bool;

    /// Best-effort stop: `stop` command, grace window, reap
    async fn stop(&mut self);

    /// One control-channel command round trip
    async fn command(&mut self, command: Command) -> Result<Reply, ControlError>;
}

/// Production controller: owns the subprocess handle and its control
/// connection.
pub struct PlayerController {
    config: PlayerConfig,
    active: Option<ActivePlayer>,
}

impl PlayerController {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    /// Wait for the control socket to appear (or, inverted, to go away)
    /// within the configured deadline.
    async fn wait_for_socket(&self, present: bool) -> bool {
        let deadline = Instant::now() + self.config.socket_wait_timeout();
        loop {
            if self.config.control_socket.exists() == present {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(self.config.socket_wait_interval()).await;
        }
    }

    async fn spawn_and_connect(
        &mut self,
        mode: PlayerMode,
        args: Vec<String>,
    ) -> Result<(), StartError> {
        let mut child = ProcessCommand::new(&self.config.playcmd)
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .map_err(StartError::Spawn)?;

        if !self.wait_for_socket(true).await {
            return match child.try_wait() {
                Ok(Some(status)) => {
                    warn!("player exited ({}) before opening its socket", status);
                    Err(StartError::PlayerExited)
                }
                _ => {
                    error!("control socket never appeared and the player is still alive");
                    let _ = child.start_kill();
                    Err(StartError::SocketTimeout)
                }
            };
        }

        let mut channel =
            ControlChannel::connect(&self.config.control_socket, &self.config.control_key)
                .await
                .map_err(StartError::Ipc)?;

        match channel.send_command(&Command::Play).await {
            Ok(Reply::Error(reason)) => return Err(StartError::Rejected(reason)),
            Ok(_) => {}
            Err(e) => return Err(StartError::Ipc(e)),
        }

        self.active = Some(ActivePlayer {
            child,
            channel: Some(channel),
            mode,
        });
        Ok(())
    }
}

impl PlayerBackend for PlayerController {
    fn mode(&self) -> Option<PlayerMode> {
        self.active.as_ref().map(|active| active.mode)
    }

    async fn start_idle(&mut self, stream_id: &str) -> Result<(), StartError> {
        info!("starting idle player");
        self.spawn_and_connect(PlayerMode::Idle, vec![stream_id.to_string()])
            .await
    }

    async fn start_media(
        &mut self,
        stream_id: &str,
        media_uri: &str,
        live: bool,
    ) -> Result<(), StartError> {
        info!("starting media player");
        let mut args = vec![stream_id.to_string(), media_uri.to_string()];
        if live {
            args.push("live".to_string());
        }
        self.spawn_and_connect(PlayerMode::Media, args).await
    }

    async fn is_alive(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        match active.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                if self.config.control_socket.exists() {
                    warn!(
                        "control socket present with exited player ({}); removing zombie socket",
                        status
                    );
                    let _ = std::fs::remove_file(&self.config.control_socket);
                } else {
                    debug!("player exited with {}", status);
                }
                self.active = None;
                false
            }
            Err(e) => {
                error!("cannot probe player process: {}", e);
                self.active = None;
                false
            }
        }
    }

    async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        if let Some(mut channel) = active.channel.take() {
            info!("sending stop command to player");
            if let Err(e) = channel.send_command(&Command::Stop).await {
                // tolerated: the process is reaped regardless
                warn!("stop command not acknowledged: {}", e);
            }
            // grace window for the pipeline to drain before we drop the
            // connection
            if !self.wait_for_socket(false).await {
                warn!("player kept its control socket past the stop deadline");
            }
        }

        match timeout(self.config.socket_wait_timeout(), active.child.wait()).await {
            Ok(Ok(status)) => debug!("player exited with {}", status),
            Ok(Err(e)) => warn!("failed to reap player: {}", e),
            Err(_) => {
                warn!("player ignored stop; killing it");
                let _ = active.child.kill().await;
            }
        }
    }

    async fn command(&mut self, command: Command) -> Result<Reply, ControlError> {
        match self.active.as_mut().and_then(|active| active.channel.as_mut()) {
            Some(channel) => channel.send_command(&command).await,
            None => Err(ControlError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "no control connection",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_config(dir: &tempfile::TempDir, playcmd: &str) -> PlayerConfig {
        PlayerConfig {
            playcmd: PathBuf::from(playcmd),
            control_socket: dir.path().join("player.sock"),
            control_key: "k".to_string(),
            socket_wait_timeout_ms: 300,
            socket_wait_interval_ms: 20,
            tick_interval_ms: 5_000,
            min_rating: -3,
            stale_media_age_secs: 3_600,
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PlayerController::new(test_config(&dir, "/nonexistent/playcmd"));

        let result = controller.start_idle("stream-1").await;
        match result {
            Err(e @ StartError::Spawn(_)) => assert!(e.is_fatal()),
            other => panic!("expected spawn failure, got {:?}", other),
        }
        assert!(controller.mode().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_timeout_with_dead_player_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        // exits immediately without ever binding the socket
        let mut controller = PlayerController::new(test_config(&dir, "/bin/true"));

        let result = controller.start_media("stream-1", "http://x/y.mp4", false).await;
        match result {
            Err(e @ StartError::PlayerExited) => assert!(!e.is_fatal()),
            other => panic!("expected PlayerExited, got {:?}", other),
        }
        assert!(controller.mode().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_socket_timeout_with_live_player_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // sleeps well past the wait deadline without binding the socket
        let mut controller = PlayerController::new(test_config(&dir, "/bin/sleep"));

        // abuse argv: stream id "30" doubles as the sleep duration
        let result = controller.start_idle("30").await;
        match result {
            Err(e @ StartError::SocketTimeout) => assert!(e.is_fatal()),
            other => panic!("expected SocketTimeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_is_alive_with_no_player() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PlayerController::new(test_config(&dir, "/bin/true"));
        assert!(!controller.is_alive().await);
    }

    #[tokio::test]
    async fn test_command_without_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = PlayerController::new(test_config(&dir, "/bin/true"));
        assert!(controller.command(Command::GetPos).await.is_err());
    }
}
