//! Control channel client
//!
//! One persistent connection to the player's control socket, exchanging
//! request/response pairs. Failures are surfaced as [`ControlError`] and
//! never retried here; retry policy belongs to the caller.

use roomcast_common::control::{self, Command, ControlError, Reply};
use std::path::Path;
use tokio::net::UnixStream;
use tracing::debug;

/// Connected, authenticated control channel to a player process.
///
/// Exclusively owned by the controller for a given subprocess instance.
pub struct ControlChannel {
    stream: UnixStream,
}

impl ControlChannel {
    /// Connect to the control socket and run the pre-shared-key handshake.
    pub async fn connect(path: &Path, key: &str) -> Result<Self, ControlError> {
        let mut stream = UnixStream::connect(path).await?;
        control::client_handshake(&mut stream, key.as_bytes()).await?;
        debug!("control connection established on {}", path.display());
        Ok(Self { stream })
    }

    /// One command round trip. A failed write means the peer is gone; a
    /// short read means it closed mid-response. Both come back as an error
    /// and the command counts as not acknowledged.
    pub async fn send_command(&mut self, command: &Command) -> Result<Reply, ControlError> {
        control::write_frame(&mut self.stream, &command.encode()).await?;
        let raw = control::read_frame(&mut self.stream).await?;
        Reply::decode(&raw)
    }
}
