//! Channel error types

use std::io;

use channel_crypto::CryptoError;
use channel_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(io::Error),

    #[error("Handshake incomplete: peer public key not received")]
    HandshakeIncomplete,

    #[error("Authentication failed: frame did not verify")]
    AuthenticationFailed,

    #[error("Short write: transport accepted only part of a frame")]
    ShortWrite,

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Channel closed")]
    Closed,
}

pub type ChannelResult<T> = Result<T, ChannelError>;

impl ChannelError {
    fn io_kind(&self) -> io::ErrorKind {
        match self {
            ChannelError::Transport(e) => e.kind(),
            ChannelError::HandshakeIncomplete => io::ErrorKind::UnexpectedEof,
            ChannelError::AuthenticationFailed => io::ErrorKind::InvalidData,
            ChannelError::ShortWrite => io::ErrorKind::WriteZero,
            ChannelError::Crypto(_) => io::ErrorKind::Other,
            ChannelError::Protocol(_) => io::ErrorKind::InvalidInput,
            ChannelError::Closed => io::ErrorKind::NotConnected,
        }
    }
}

/// Unwraps channel errors that crossed an `AsyncRead`/`AsyncWrite` boundary
impl From<io::Error> for ChannelError {
    fn from(err: io::Error) -> Self {
        if err
            .get_ref()
            .is_some_and(|inner| inner.is::<ChannelError>())
        {
            let kind = err.kind();
            return match err.into_inner().map(|inner| inner.downcast::<ChannelError>()) {
                Some(Ok(inner)) => *inner,
                _ => ChannelError::Transport(kind.into()),
            };
        }

        if err.kind() == io::ErrorKind::WriteZero {
            return ChannelError::ShortWrite;
        }

        ChannelError::Transport(err)
    }
}

impl From<ChannelError> for io::Error {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Transport(e) => e,
            other => io::Error::new(other.io_kind(), other),
        }
    }
}
