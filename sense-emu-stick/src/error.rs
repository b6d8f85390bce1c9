//! Event bus error types

use thiserror::Error;

/// Errors from the joystick event bus
#[derive(Error, Debug)]
pub enum StickError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event bus closed")]
    Closed,
}
