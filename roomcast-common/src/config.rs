//! Configuration loading
//!
//! Settings live in a TOML file resolved in priority order: explicit path
//! (CLI argument), `ROOMCAST_CONFIG` environment variable, then the usual
//! locations (`~/.config/roomcast/config.toml`, `/etc/roomcast/config.toml`).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Remote room endpoint and session behavior
    pub room: RoomConfig,
    /// Player subprocess control
    pub player: PlayerConfig,
    /// Media resolution
    #[serde(default)]
    pub resolver: ResolverConfig,
    /// Bot-side wiring (command prefix, elevation)
    #[serde(default)]
    pub bot: BotConfig,
}

/// Remote room endpoint and polling behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RoomConfig {
    /// Entrypoint URL of the room API
    pub entrypoint_url: String,
    /// Username the bot appears as in the room
    pub app_username: String,
    /// Shared key presented on join
    pub api_key: String,
    /// Room to join
    pub room_name: String,

    /// Base polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Ceiling the poll interval backs off toward when the room is quiet
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    /// Step added to the poll interval per throttle decision
    #[serde(default = "default_throttle_step_ms")]
    pub throttle_step_ms: u64,
    /// Quiet time before throttling begins
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// Transient-transport-failure retries per action
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Fixed delay between those retries
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Join attempts before the session is declared unrecoverable
    #[serde(default = "default_rejoin_attempts")]
    pub rejoin_attempts: u32,

    /// Room commands issued right after every successful join
    #[serde(default)]
    pub join_commands: Vec<String>,
    /// Announcement after a first join
    #[serde(default = "default_ready_message")]
    pub ready_message: String,
    /// Announcement after rejoining a dropped session
    #[serde(default = "default_rejoin_message")]
    pub rejoin_message: String,

    /// Inbound lines starting with this are room control traffic
    #[serde(default = "default_control_marker")]
    pub control_marker: String,
    /// Control lines containing this carry a private message to the bot
    #[serde(default = "default_privmsg_marker")]
    pub privmsg_marker: String,
}

impl RoomConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }

    pub fn throttle_step(&self) -> Duration {
        Duration::from_millis(self.throttle_step_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Consecutive empty polls tolerated before the interval steps up
    pub fn empty_polls_before_throttle(&self) -> u32 {
        (self.idle_timeout_ms / self.poll_interval_ms.max(1)).max(1) as u32
    }
}

/// Player subprocess control
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerConfig {
    /// Player executable spawned per playback
    pub playcmd: PathBuf,
    /// Unix socket path the player binds for control traffic
    pub control_socket: PathBuf,
    /// Pre-shared key for the control-channel handshake
    pub control_key: String,

    /// How long to wait for the control socket to appear or disappear
    #[serde(default = "default_socket_wait_timeout_ms")]
    pub socket_wait_timeout_ms: u64,
    /// Poll spacing while waiting on the socket
    #[serde(default = "default_socket_wait_interval_ms")]
    pub socket_wait_interval_ms: u64,

    /// Scheduler tick interval
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Rating below which the current item is voted out
    #[serde(default = "default_min_rating")]
    pub min_rating: i64,
    /// Resolved media older than this is re-resolved before playback
    #[serde(default = "default_stale_media_age_secs")]
    pub stale_media_age_secs: u64,
}

impl PlayerConfig {
    pub fn socket_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_wait_timeout_ms)
    }

    pub fn socket_wait_interval(&self) -> Duration {
        Duration::from_millis(self.socket_wait_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn stale_media_age(&self) -> Duration {
        Duration::from_secs(self.stale_media_age_secs)
    }
}

/// Media resolution settings
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    /// Extractor binary invoked with `--dump-json`
    #[serde(default = "default_extractor_bin")]
    pub extractor_bin: PathBuf,
    /// Format selector passed to the extractor
    #[serde(default = "default_format")]
    pub format: String,
    /// Prefix turning free-text search terms into an extractor target
    #[serde(default = "default_search_prefix")]
    pub search_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            extractor_bin: default_extractor_bin(),
            format: default_format(),
            search_prefix: default_search_prefix(),
        }
    }
}

/// Bot-side wiring
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Senders granted the elevated flag on dispatched commands
    #[serde(default)]
    pub elevated_senders: Vec<String>,
    /// Chat commands start with this prefix
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Inbound marker announcing the outbound stream id
    #[serde(default = "default_stream_id_marker")]
    pub stream_id_marker: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            elevated_senders: Vec::new(),
            command_prefix: default_command_prefix(),
            stream_id_marker: default_stream_id_marker(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_poll_interval_ms() -> u64 {
    30_000
}
fn default_throttle_step_ms() -> u64 {
    2_000
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_http_timeout_ms() -> u64 {
    10_000
}
fn default_retry_count() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    5_000
}
fn default_rejoin_attempts() -> u32 {
    5
}
fn default_ready_message() -> String {
    "/me is ready &mdash; type **!help** to get started.".to_string()
}
fn default_rejoin_message() -> String {
    "/me has rejoined after a disconnect.".to_string()
}
fn default_control_marker() -> String {
    "***".to_string()
}
fn default_privmsg_marker() -> String {
    "[private]".to_string()
}
fn default_socket_wait_timeout_ms() -> u64 {
    10_000
}
fn default_socket_wait_interval_ms() -> u64 {
    250
}
fn default_tick_interval_ms() -> u64 {
    5_000
}
fn default_min_rating() -> i64 {
    -3
}
fn default_stale_media_age_secs() -> u64 {
    3_600
}
fn default_extractor_bin() -> PathBuf {
    PathBuf::from("yt-dlp")
}
fn default_format() -> String {
    "best[height <=? 1080][protocol !=? m3u8_native]".to_string()
}
fn default_search_prefix() -> String {
    "ytsearch1:".to_string()
}
fn default_command_prefix() -> String {
    "!".to_string()
}
fn default_stream_id_marker() -> String {
    "stream id:".to_string()
}

/// Load configuration from the resolved path.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let path = resolve_config_path(explicit)?;
    debug!("loading configuration from {}", path.display());

    let text = std::fs::read_to_string(&path)
        .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;

    let config: Config = toml::from_str(&text)
        .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;

    Ok(config)
}

/// Resolve the configuration file path.
///
/// Priority: explicit path, `ROOMCAST_CONFIG`, user config dir, `/etc`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var("ROOMCAST_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    if let Some(dir) = dirs::config_dir() {
        let user_config = dir.join("roomcast").join("config.toml");
        if user_config.exists() {
            return Ok(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/roomcast/config.toml");
    if system_config.exists() {
        return Ok(system_config);
    }

    Err(Error::Config("no config file found".to_string()))
}
