//! Common error types for roomcast

use thiserror::Error;

/// Common result type for roomcast operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the bot and player processes
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Control-channel protocol error
    #[error("Control channel error: {0}")]
    Control(#[from] crate::control::ControlError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
