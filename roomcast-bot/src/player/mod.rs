//! Player subprocess control
//!
//! The player process owns the media pipeline and the network sink; this
//! module owns the player process: spawning it, waiting for its control
//! socket, talking to it, and noticing when it dies.

pub mod channel;
pub mod controller;

pub use channel::ControlChannel;
pub use controller::{PlayerBackend, PlayerController, PlayerMode, StartError};
