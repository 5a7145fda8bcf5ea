//! Secure reader pipeline
//!
//! A background task pulls sealed frames off the raw read half, opens them
//! and hands plaintext messages to [`SecureReader`] through a bounded queue.
//! When the queue is full the task stops reading from the transport.

use std::future::{Future, poll_fn};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use channel_crypto::{FrameCipher, SharedKey};
use channel_protocol::ChannelConfig;
use futures::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{Instrument, debug, warn};

use crate::codec::SealedFrameCodec;
use crate::stats::ChannelCounters;
use crate::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Open,
    /// Peer closed cleanly
    Eof,
    /// Pipeline delivered its error
    Failed,
    /// Closed locally
    Closed,
}

/// Pull side of a secure channel
///
/// Yields decrypted messages in the order they were sealed, either whole via
/// [`SecureReader::recv`] or as a byte stream via [`AsyncRead`].
pub struct SecureReader {
    messages: mpsc::Receiver<ChannelResult<Bytes>>,
    pending: Bytes,
    state: ReadState,
    task: JoinHandle<()>,
}

impl SecureReader {
    /// Open frames arriving on `raw`, a one-directional transport whose
    /// handshake already produced `key`
    pub fn new<R>(raw: R, key: &SharedKey, config: &ChannelConfig) -> ChannelResult<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        config.validate()?;
        let cipher = Arc::new(FrameCipher::new(key)?);

        Ok(Self::spawn(
            raw,
            cipher,
            config,
            Arc::new(ChannelCounters::default()),
        ))
    }

    pub(crate) fn spawn<R>(
        raw: R,
        cipher: Arc<FrameCipher>,
        config: &ChannelConfig,
        counters: Arc<ChannelCounters>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, messages) = mpsc::channel(config.pipe_capacity);
        let frames = FramedRead::new(raw, SealedFrameCodec::new(cipher, config.max_frame_size));
        let task = tokio::spawn(run_reader(frames, tx, counters).in_current_span());

        Self {
            messages,
            pending: Bytes::new(),
            state: ReadState::Open,
            task,
        }
    }

    /// Receive the next message
    ///
    /// Returns `Ok(None)` once the peer has closed its side cleanly. Bytes
    /// left over from a partial [`AsyncRead`] are returned first.
    pub async fn recv(&mut self) -> ChannelResult<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }

        poll_fn(|cx| self.poll_next_message(cx)).await
    }

    /// Stop the pipeline and release the read half of the transport
    pub fn close(&mut self) {
        if self.state == ReadState::Closed {
            return;
        }

        self.task.abort();
        self.messages.close();
        self.pending.clear();
        self.state = ReadState::Closed;
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.state == ReadState::Failed
    }

    fn poll_next_message(&mut self, cx: &mut Context<'_>) -> Poll<ChannelResult<Option<Bytes>>> {
        match self.state {
            ReadState::Open => {}
            ReadState::Eof => return Poll::Ready(Ok(None)),
            ReadState::Failed | ReadState::Closed => {
                return Poll::Ready(Err(ChannelError::Closed));
            }
        }

        match ready!(self.messages.poll_recv(cx)) {
            Some(Ok(message)) => Poll::Ready(Ok(Some(message))),
            Some(Err(e)) => {
                self.state = ReadState::Failed;
                Poll::Ready(Err(e))
            }
            // The queue also closes when the task dies; only a clean exit is EOF.
            None => match ready!(Pin::new(&mut self.task).poll(cx)) {
                Ok(()) => {
                    self.state = ReadState::Eof;
                    Poll::Ready(Ok(None))
                }
                Err(join) if join.is_panic() => {
                    self.state = ReadState::Failed;
                    Poll::Ready(Err(ChannelError::Transport(io::Error::other(join))))
                }
                Err(_) => {
                    self.state = ReadState::Closed;
                    Poll::Ready(Err(ChannelError::Closed))
                }
            },
        }
    }
}

impl AsyncRead for SecureReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.pending.is_empty() {
            match ready!(this.poll_next_message(cx)) {
                Ok(Some(message)) => this.pending = message,
                Ok(None) => return Poll::Ready(Ok(())),
                Err(e) => return Poll::Ready(Err(e.into())),
            }
        }

        let n = this.pending.len().min(buf.remaining());
        buf.put_slice(&this.pending.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl Drop for SecureReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_reader<R>(
    mut frames: FramedRead<R, SealedFrameCodec>,
    messages: mpsc::Sender<ChannelResult<Bytes>>,
    counters: Arc<ChannelCounters>,
) where
    R: AsyncRead + Unpin,
{
    while let Some(next) = frames.next().await {
        let message = match next {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "reader pipeline stopped");
                counters.record_failure();
                let _ = messages.send(Err(e)).await;
                return;
            }
        };

        counters.record_received(message.len());

        // A zero-length read means end of stream, so empty messages are not surfaced.
        if message.is_empty() {
            continue;
        }

        if messages.send(Ok(message)).await.is_err() {
            debug!("reader dropped, stopping pipeline");
            return;
        }
    }

    debug!("peer closed its write side");
}
