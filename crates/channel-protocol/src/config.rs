//! Channel configuration

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_MAX_FRAME_SIZE, DEFAULT_PIPE_CAPACITY, DEFAULT_WRITE_CHUNK_SIZE, FRAME_OVERHEAD,
    ProtocolError, ProtocolResult,
};

/// Tunables for one secure channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Largest frame (nonce + ciphertext) accepted from the transport
    pub max_frame_size: usize,
    /// Plaintext bytes sealed into one frame; larger writes are fragmented
    pub write_chunk_size: usize,
    /// Queue depth between each pipeline task and the channel
    pub pipe_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl ChannelConfig {
    /// Check the settings can produce frames the peer will accept
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.max_frame_size == 0 {
            return Err(ProtocolError::ZeroConfigValue {
                field: "max_frame_size",
            });
        }
        if self.write_chunk_size == 0 {
            return Err(ProtocolError::ZeroConfigValue {
                field: "write_chunk_size",
            });
        }
        if self.pipe_capacity == 0 {
            return Err(ProtocolError::ZeroConfigValue {
                field: "pipe_capacity",
            });
        }
        if u32::try_from(self.max_frame_size).is_err() {
            return Err(ProtocolError::FrameSizeOutOfRange {
                size: self.max_frame_size,
            });
        }

        let sealed = self.write_chunk_size.saturating_add(FRAME_OVERHEAD);
        if sealed > self.max_frame_size {
            return Err(ProtocolError::ChunkExceedsFrame {
                chunk: self.write_chunk_size,
                sealed,
                max: self.max_frame_size,
            });
        }

        Ok(())
    }
}
