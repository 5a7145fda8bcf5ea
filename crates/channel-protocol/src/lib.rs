//! Shared Protocol Definitions for Sealed Echo
//!
//! Wire constants, channel configuration and the channel lifecycle state
//! machine shared by the crypto and transport crates.

mod config;
mod error;
mod state;

pub use config::*;
pub use error::*;
pub use state::*;

/// Public key size on the wire (X25519, 32 bytes)
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Per-frame nonce size (XChaCha20Poly1305, 192 bits / 24 bytes)
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (Poly1305, 128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed frame adds on top of its plaintext
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Size of the big-endian length field in front of every frame
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for one frame read from the transport (32 KiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 32 * 1024;

/// Default plaintext bytes accepted per writer call (1 KiB)
pub const DEFAULT_WRITE_CHUNK_SIZE: usize = 1024;

/// Default depth of the queues between the pipelines and the channel
pub const DEFAULT_PIPE_CAPACITY: usize = 1;
