//! Crypto error types

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key setup failed: {0}")]
    KeySetup(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
