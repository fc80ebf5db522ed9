//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty frame")]
    EmptyFrame,

    #[error("Frame too large: {size} > {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Invalid state vector: {0}")]
    InvalidStateVector(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
