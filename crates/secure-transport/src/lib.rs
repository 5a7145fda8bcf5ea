//! Secure Transport - sealed byte streams for Sealed Echo
//!
//! Runs the public key handshake over a raw stream and then moves data
//! through two background pipelines: a reader that opens incoming frames and
//! a writer that seals outgoing chunks. [`SecureChannel`] exposes both as an
//! ordinary `AsyncRead + AsyncWrite` stream.

mod channel;
mod codec;
mod error;
pub mod handshake;
mod reader;
mod service;
mod stats;
mod writer;

pub use channel::*;
pub use error::*;
pub use handshake::Role;
pub use reader::*;
pub use service::*;
pub use stats::ChannelStats;
pub use writer::*;

pub use channel_protocol::{ChannelConfig, ChannelState};
