//! Control-channel wire protocol between the bot and the player process
//!
//! The player binds a Unix socket and the bot connects to it. After a mutual
//! pre-shared-key handshake, traffic is request/response pairs: each message
//! is a length-prefixed JSON array of the form `[name]` or `[name, arg]`;
//! replies are `["OK"]`, `["OK", payload]`, or `["ERROR", reason]`.
//!
//! Both halves of the handshake live here so a player implementation can
//! link this crate for its side of the conversation.

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Upper bound on a single frame; anything larger is a protocol violation.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const CHALLENGE_LEN: usize = 16;
const AUTH_WELCOME: &[u8] = b"OK";
const AUTH_FAILURE: &[u8] = b"NO";

/// Control-channel result type
pub type ControlResult<T> = std::result::Result<T, ControlError>;

/// Control-channel errors
///
/// I/O failures cover both directions: a failed write means the peer is
/// gone, a short read means it closed mid-response. Neither is retried at
/// this layer.
#[derive(Error, Debug)]
pub enum ControlError {
    /// Transport failure (peer gone, closed mid-response, socket error)
    #[error("control I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer announced a frame larger than [`MAX_FRAME_LEN`]
    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    /// Frame arrived but could not be interpreted
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Pre-shared-key handshake failed
    #[error("authentication rejected")]
    AuthRejected,
}

// ========================================
// Messages
// ========================================

/// Commands the bot issues to the player process.
///
/// `jump` has no wire form: the caller computes the delta against the
/// current position and issues a [`Command::Seek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Begin playback (idle card or media, per the player's argv)
    Play,
    /// Stop playback; the player closes its socket once the pipeline is down
    Stop,
    /// Query `(position_secs, duration_secs)` of seekable media
    GetPos,
    /// Query elapsed seconds of a live source
    GetLivePos,
    /// Seek by a relative number of seconds (negative rewinds)
    Seek(i64),
}

impl Command {
    /// Wire name of this command
    pub fn name(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Stop => "stop",
            Command::GetPos => "getpos",
            Command::GetLivePos => "getlivepos",
            Command::Seek(_) => "seek",
        }
    }

    /// Encode to the `[name]` / `[name, arg]` wire form
    pub fn encode(&self) -> Vec<u8> {
        let frame = match self {
            Command::Seek(delta) => serde_json::json!([self.name(), delta]),
            _ => serde_json::json!([self.name()]),
        };
        frame.to_string().into_bytes()
    }

    /// Decode from the wire form; unknown names are malformed
    pub fn decode(bytes: &[u8]) -> ControlResult<Self> {
        let (name, arg) = split_frame(bytes)?;
        match name.as_str() {
            "play" => Ok(Command::Play),
            "stop" => Ok(Command::Stop),
            "getpos" => Ok(Command::GetPos),
            "getlivepos" => Ok(Command::GetLivePos),
            "seek" => {
                let delta = arg
                    .as_ref()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ControlError::Malformed("seek requires a delta".into()))?;
                Ok(Command::Seek(delta))
            }
            other => Err(ControlError::Malformed(format!("unknown command '{}'", other))),
        }
    }
}

/// Replies the player sends back for each command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Command acknowledged, optionally with a payload
    Ok(Option<Value>),
    /// Command failed with a reason
    Error(String),
}

impl Reply {
    /// A bare acknowledgement
    pub fn ok() -> Self {
        Reply::Ok(None)
    }

    /// An acknowledgement carrying a payload
    pub fn ok_with(payload: impl Serialize) -> Self {
        Reply::Ok(Some(serde_json::to_value(payload).expect("payload serializes")))
    }

    /// A failure with a reason
    pub fn error(reason: impl Into<String>) -> Self {
        Reply::Error(reason.into())
    }

    /// Whether this reply acknowledges the command
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    /// Extract and deserialize the payload of an `OK` reply
    pub fn payload<T: DeserializeOwned>(&self) -> ControlResult<T> {
        match self {
            Reply::Ok(Some(value)) => serde_json::from_value(value.clone())
                .map_err(|e| ControlError::Malformed(format!("bad payload: {}", e))),
            Reply::Ok(None) => Err(ControlError::Malformed("reply carries no payload".into())),
            Reply::Error(reason) => Err(ControlError::Malformed(format!(
                "error reply has no payload: {}",
                reason
            ))),
        }
    }

    /// Encode to the `["OK"[, payload]]` / `["ERROR", reason]` wire form
    pub fn encode(&self) -> Vec<u8> {
        let frame = match self {
            Reply::Ok(None) => serde_json::json!(["OK"]),
            Reply::Ok(Some(payload)) => serde_json::json!(["OK", payload]),
            Reply::Error(reason) => serde_json::json!(["ERROR", reason]),
        };
        frame.to_string().into_bytes()
    }

    /// Decode from the wire form
    pub fn decode(bytes: &[u8]) -> ControlResult<Self> {
        let (name, arg) = split_frame(bytes)?;
        match name.as_str() {
            "OK" => Ok(Reply::Ok(arg)),
            "ERROR" => {
                let reason = arg
                    .as_ref()
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string();
                Ok(Reply::Error(reason))
            }
            other => Err(ControlError::Malformed(format!("unknown reply '{}'", other))),
        }
    }
}

/// Split a wire frame into its name and optional single argument.
fn split_frame(bytes: &[u8]) -> ControlResult<(String, Option<Value>)> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ControlError::Malformed(format!("not JSON: {}", e)))?;

    let parts = value
        .as_array()
        .ok_or_else(|| ControlError::Malformed("frame is not an array".into()))?;

    if parts.is_empty() || parts.len() > 2 {
        return Err(ControlError::Malformed(format!(
            "frame has {} elements",
            parts.len()
        )));
    }

    let name = parts[0]
        .as_str()
        .ok_or_else(|| ControlError::Malformed("frame name is not a string".into()))?
        .to_string();

    Ok((name, parts.get(1).cloned()))
}

// ========================================
// Framing
// ========================================

/// Write one length-prefixed frame (u32 big-endian length, then payload).
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> ControlResult<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ControlError::FrameTooLarge(payload.len()));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
pub async fn read_frame<R>(reader: &mut R) -> ControlResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ControlError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

// ========================================
// Pre-shared-key handshake
// ========================================

fn challenge_digest(key: &[u8], challenge: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Challenge the peer to prove it holds the shared key.
async fn deliver_challenge<S>(stream: &mut S, key: &[u8]) -> ControlResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge: [u8; CHALLENGE_LEN] = rand::thread_rng().gen();
    write_frame(stream, &challenge).await?;

    let answer = read_frame(stream).await?;
    if answer == challenge_digest(key, &challenge) {
        write_frame(stream, AUTH_WELCOME).await?;
        Ok(())
    } else {
        debug!("peer failed control-channel challenge");
        write_frame(stream, AUTH_FAILURE).await?;
        Err(ControlError::AuthRejected)
    }
}

/// Answer the peer's challenge with our copy of the shared key.
async fn answer_challenge<S>(stream: &mut S, key: &[u8]) -> ControlResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let challenge = read_frame(stream).await?;
    write_frame(stream, &challenge_digest(key, &challenge)).await?;

    let verdict = read_frame(stream).await?;
    if verdict == AUTH_WELCOME {
        Ok(())
    } else {
        Err(ControlError::AuthRejected)
    }
}

/// Connecting side of the handshake: answer the listener's challenge, then
/// challenge it back. Mutual, so a stray process on either end of the socket
/// path cannot impersonate the other.
pub async fn client_handshake<S>(stream: &mut S, key: &[u8]) -> ControlResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    answer_challenge(stream, key).await?;
    deliver_challenge(stream, key).await
}

/// Listening side of the handshake.
pub async fn server_handshake<S>(stream: &mut S, key: &[u8]) -> ControlResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    deliver_challenge(stream, key).await?;
    answer_challenge(stream, key).await
}

// ========================================
// Tests
// ========================================
