//! Channel Crypto - sealed frames for Sealed Echo
//!
//! Provides ephemeral X25519 key agreement with XChaCha20Poly1305 frame
//! sealing under random 24-byte nonces.

mod error;
mod frame;
mod keys;

pub use error::*;
pub use frame::*;
pub use keys::*;

pub use channel_protocol::{FRAME_OVERHEAD, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};

/// Shared secret size (256 bits / 32 bytes)
pub const SHARED_SECRET_SIZE: usize = 32;
