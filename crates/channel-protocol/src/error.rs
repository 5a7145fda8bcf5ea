//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: crate::ChannelState,
        to: crate::ChannelState,
    },

    #[error("Invalid config: {field} must be non-zero")]
    ZeroConfigValue { field: &'static str },

    #[error("Write chunk too large: {chunk} bytes sealed into {sealed} exceeds max frame size {max}")]
    ChunkExceedsFrame {
        chunk: usize,
        sealed: usize,
        max: usize,
    },

    #[error("Max frame size {size} exceeds the length prefix range")]
    FrameSizeOutOfRange { size: usize },
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
