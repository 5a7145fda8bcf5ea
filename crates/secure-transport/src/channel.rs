//! Bidirectional secure channel
//!
//! Couples a [`SecureReader`] and a [`SecureWriter`] over the two halves of
//! one raw stream. The pipeline tasks own the halves; closing the channel
//! aborts both tasks, which drops the halves and with them the stream.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use channel_crypto::{FrameCipher, SharedKey};
use channel_protocol::{ChannelConfig, ChannelState};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::handshake::{self, Role};
use crate::stats::{ChannelCounters, ChannelStats};
use crate::{ChannelResult, SecureReader, SecureWriter};

/// Encrypted, authenticated byte stream between two peers
pub struct SecureChannel {
    reader: SecureReader,
    writer: SecureWriter,
    counters: Arc<ChannelCounters>,
    peer_addr: Option<SocketAddr>,
    state: ChannelState,
}

impl SecureChannel {
    /// Wrap a stream whose handshake already produced `key`
    pub fn new<S>(stream: S, key: &SharedKey, config: &ChannelConfig) -> ChannelResult<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;

        let cipher = Arc::new(FrameCipher::new(key)?);
        let counters = Arc::new(ChannelCounters::default());
        let (read_half, write_half) = tokio::io::split(stream);

        let reader = SecureReader::spawn(read_half, cipher.clone(), config, counters.clone());
        let writer = SecureWriter::spawn(write_half, cipher, config, counters.clone());

        Ok(Self {
            reader,
            writer,
            counters,
            peer_addr: None,
            state: ChannelState::Open,
        })
    }

    /// Run the handshake as `role` on `stream`, then open the channel on it
    pub async fn handshake<S>(mut stream: S, role: Role, config: &ChannelConfig) -> ChannelResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let key = handshake::perform(&mut stream, role).await?;
        Self::new(stream, &key, config)
    }

    pub(crate) fn with_peer_addr(mut self, peer_addr: Option<SocketAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Lifecycle state
    ///
    /// An open channel reports `Closing` as soon as either pipeline task has
    /// stopped with an error, even before that error is consumed.
    pub fn state(&self) -> ChannelState {
        let failed =
            self.counters.has_failed() || self.reader.has_failed() || self.writer.has_failed();

        match self.state {
            ChannelState::Open if failed => ChannelState::Closing,
            state => state,
        }
    }

    pub fn stats(&self) -> ChannelStats {
        self.counters.snapshot()
    }

    /// Receive the next decrypted message, `None` at end of stream
    pub async fn recv(&mut self) -> ChannelResult<Option<Bytes>> {
        self.reader.recv().await
    }

    /// Send `data`, one frame per `write_chunk_size` bytes
    pub async fn send(&mut self, data: &[u8]) -> ChannelResult<()> {
        self.writer.send(data).await
    }

    /// Flush pending frames and half-close the stream; reading stays possible
    pub async fn finish(&mut self) -> ChannelResult<()> {
        self.writer.finish().await
    }

    /// Tear the channel down
    ///
    /// Never blocks and may be called any number of times. Frames still
    /// queued for writing are dropped; use [`SecureChannel::finish`] first to
    /// deliver them.
    pub fn close(&mut self) {
        let Ok(closed) = self.state().transition(ChannelState::Closed) else {
            return;
        };

        self.reader.close();
        self.writer.close();
        self.state = closed;

        debug!(peer = ?self.peer_addr, stats = ?self.stats(), "secure channel closed");
    }

    /// Split into independently owned read and write ends
    pub fn into_split(self) -> (SecureReader, SecureWriter) {
        (self.reader, self.writer)
    }
}

impl AsyncRead for SecureChannel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureChannel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().writer).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().writer).poll_shutdown(cx)
    }
}
