//! Secure writer pipeline
//!
//! [`SecureWriter`] hands plaintext chunks to a background task through a
//! bounded queue. The task seals each chunk into its own frame under a fresh
//! nonce and writes it to the raw write half.

use std::future::{Future, poll_fn};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use channel_crypto::{FrameCipher, SharedKey};
use channel_protocol::ChannelConfig;
use futures::SinkExt;
use futures::task::AtomicWaker;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::PollSender;
use tracing::{Instrument, debug, warn};

use crate::codec::SealedFrameCodec;
use crate::stats::ChannelCounters;
use crate::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Open,
    /// Shutdown requested, pipeline draining
    Finishing,
    /// Pipeline drained and the transport write side is closed
    Finished,
    /// Pipeline stopped with an error
    Failed,
    /// Closed locally
    Closed,
}

/// Frames the pipeline has written and flushed to the transport
#[derive(Debug, Default)]
struct FlushProgress {
    written: AtomicU64,
    waker: AtomicWaker,
}

impl FlushProgress {
    fn advance(&self) {
        self.written.fetch_add(1, Ordering::Release);
        self.waker.wake();
    }

    fn written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }
}

/// Push side of a secure channel
///
/// Every accepted chunk of at most `write_chunk_size` bytes becomes exactly
/// one frame. Pipeline failures are reported by the next write, flush or
/// shutdown.
pub struct SecureWriter {
    chunks: Option<PollSender<Bytes>>,
    task: Option<JoinHandle<ChannelResult<()>>>,
    progress: Arc<FlushProgress>,
    /// Chunks handed to the pipeline so far
    accepted: u64,
    chunk_size: usize,
    state: WriteState,
}

impl SecureWriter {
    /// Seal everything written into frames on `raw`, a one-directional
    /// transport whose handshake already produced `key`
    pub fn new<W>(raw: W, key: &SharedKey, config: &ChannelConfig) -> ChannelResult<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
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

    pub(crate) fn spawn<W>(
        raw: W,
        cipher: Arc<FrameCipher>,
        config: &ChannelConfig,
        counters: Arc<ChannelCounters>,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(config.pipe_capacity);
        let frames = FramedWrite::new(raw, SealedFrameCodec::new(cipher, config.max_frame_size));
        let progress = Arc::new(FlushProgress::default());
        let task = tokio::spawn(
            run_writer(frames, rx, counters, progress.clone()).in_current_span(),
        );

        Self {
            chunks: Some(PollSender::new(tx)),
            task: Some(task),
            progress,
            accepted: 0,
            chunk_size: config.write_chunk_size,
            state: WriteState::Open,
        }
    }

    /// Send all of `data`, fragmenting it into chunk-sized frames
    pub async fn send(&mut self, data: &[u8]) -> ChannelResult<()> {
        let mut remaining = data;

        while !remaining.is_empty() {
            let n = poll_fn(|cx| self.poll_send_chunk(cx, remaining)).await?;
            remaining = &remaining[n..];
        }

        Ok(())
    }

    /// Drain queued frames and close the transport write side
    ///
    /// The peer's reader observes a clean end of stream afterwards.
    pub async fn finish(&mut self) -> ChannelResult<()> {
        poll_fn(|cx| self.poll_finish(cx)).await
    }

    /// Stop the pipeline immediately, dropping any queued chunk
    pub fn close(&mut self) {
        self.chunks = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.state != WriteState::Finished {
            self.state = WriteState::Closed;
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.state == WriteState::Failed
    }

    fn poll_send_chunk(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<ChannelResult<usize>> {
        if self.state != WriteState::Open {
            return Poll::Ready(Err(ChannelError::Closed));
        }

        let Some(chunks) = self.chunks.as_mut() else {
            return self.poll_failure(cx).map(Err);
        };

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if ready!(chunks.poll_reserve(cx)).is_err() {
            self.chunks = None;
            return self.poll_failure(cx).map(Err);
        }

        let n = buf.len().min(self.chunk_size);
        if chunks.send_item(Bytes::copy_from_slice(&buf[..n])).is_err() {
            self.chunks = None;
            return self.poll_failure(cx).map(Err);
        }
        self.accepted += 1;

        Poll::Ready(Ok(n))
    }

    /// Wait until every accepted chunk is sealed and flushed to the transport
    fn poll_flush_chunks(&mut self, cx: &mut Context<'_>) -> Poll<ChannelResult<()>> {
        match self.state {
            WriteState::Open => {}
            WriteState::Finishing | WriteState::Finished => return Poll::Ready(Ok(())),
            WriteState::Failed | WriteState::Closed => {
                return Poll::Ready(Err(ChannelError::Closed));
            }
        }

        if self.chunks.is_some() {
            self.progress.waker.register(cx.waker());
            if self.progress.written() >= self.accepted {
                return Poll::Ready(Ok(()));
            }
        }

        // Still draining: this only resolves early if the pipeline stops.
        self.poll_failure(cx).map(Err)
    }

    fn poll_finish(&mut self, cx: &mut Context<'_>) -> Poll<ChannelResult<()>> {
        match self.state {
            WriteState::Open => {
                self.chunks = None;
                self.state = WriteState::Finishing;
            }
            WriteState::Finishing => {}
            WriteState::Finished => return Poll::Ready(Ok(())),
            WriteState::Failed | WriteState::Closed => {
                return Poll::Ready(Err(ChannelError::Closed));
            }
        }

        let Some(task) = self.task.as_mut() else {
            self.state = WriteState::Finished;
            return Poll::Ready(Ok(()));
        };

        let outcome = ready!(Pin::new(task).poll(cx));
        self.task = None;

        match outcome {
            Ok(Ok(())) => {
                self.state = WriteState::Finished;
                Poll::Ready(Ok(()))
            }
            Ok(Err(e)) => {
                self.state = WriteState::Failed;
                Poll::Ready(Err(e))
            }
            Err(join) => {
                self.state = WriteState::Failed;
                Poll::Ready(Err(ChannelError::Transport(io::Error::other(join))))
            }
        }
    }

    /// Resolve the reason the pipeline stopped accepting chunks
    fn poll_failure(&mut self, cx: &mut Context<'_>) -> Poll<ChannelError> {
        let Some(task) = self.task.as_mut() else {
            return Poll::Ready(ChannelError::Closed);
        };

        let outcome = ready!(Pin::new(task).poll(cx));
        self.task = None;
        self.chunks = None;
        self.state = WriteState::Failed;

        Poll::Ready(match outcome {
            Ok(Err(e)) => e,
            Ok(Ok(())) => ChannelError::Closed,
            Err(join) if join.is_cancelled() => ChannelError::Closed,
            Err(join) => ChannelError::Transport(io::Error::other(join)),
        })
    }
}

impl AsyncWrite for SecureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().poll_send_chunk(cx, buf).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_flush_chunks(cx).map_err(Into::into)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_finish(cx).map_err(Into::into)
    }
}

async fn run_writer<W>(
    mut frames: FramedWrite<W, SealedFrameCodec>,
    mut chunks: mpsc::Receiver<Bytes>,
    counters: Arc<ChannelCounters>,
    progress: Arc<FlushProgress>,
) -> ChannelResult<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = chunks.recv().await {
        let len = chunk.len();

        if let Err(e) = frames.send(chunk).await {
            warn!(error = %e, "writer pipeline stopped");
            counters.record_failure();
            return Err(e);
        }

        counters.record_sent(len);
        progress.advance();
    }

    debug!("writer finished, closing transport write side");
    frames.close().await.inspect_err(|_| counters.record_failure())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use channel_crypto::{KeyPair, NONCE_SIZE, frame_nonce};
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

    use super::*;
    use crate::SecureReader;
    use crate::codec::tests::cipher_pair;

    /// Transport that never accepts a byte
    struct ZeroSink;

    impl AsyncWrite for ZeroSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn writer_over(
        raw: tokio::io::DuplexStream,
        cipher: Arc<FrameCipher>,
        config: &ChannelConfig,
    ) -> (SecureWriter, Arc<ChannelCounters>) {
        let counters = Arc::new(ChannelCounters::default());
        let writer = SecureWriter::spawn(raw, cipher, config, counters.clone());
        (writer, counters)
    }

    fn raw_frames(raw: tokio::io::DuplexStream) -> FramedRead<tokio::io::DuplexStream, LengthDelimitedCodec> {
        FramedRead::new(raw, LengthDelimitedCodec::new())
    }

    #[tokio::test]
    async fn test_each_chunk_is_one_frame() {
        let (alice, bob) = cipher_pair();
        let (near, far) = tokio::io::duplex(4096);
        let config = ChannelConfig {
            write_chunk_size: 4,
            ..Default::default()
        };
        let (mut writer, counters) = writer_over(near, alice, &config);

        writer.send(b"abcdefghij").await.unwrap();
        writer.finish().await.unwrap();

        let frames: Vec<_> = raw_frames(far)
            .map(|frame| bob.open(&frame.unwrap()).unwrap())
            .collect()
            .await;

        assert_eq!(frames, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
        let stats = counters.snapshot();
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.bytes_sent, 10);
    }

    #[tokio::test]
    async fn test_async_write_accepts_one_chunk_per_call() {
        let (alice, _) = cipher_pair();
        let (near, _far) = tokio::io::duplex(4096);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());

        let n = writer.write(&[0u8; 3000]).await.unwrap();
        assert_eq!(n, 1024);
        assert_eq!(writer.write(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nonces_are_unique_across_frames() {
        let (alice, _) = cipher_pair();
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());

        let producer = tokio::spawn(async move {
            for _ in 0..5_000 {
                writer.send(b"identical plaintext").await.unwrap();
            }
            writer.finish().await.unwrap();
        });

        let mut nonces = HashSet::new();
        let mut frames = raw_frames(far);
        while let Some(frame) = frames.next().await {
            let nonce: [u8; NONCE_SIZE] = frame_nonce(&frame.unwrap()).unwrap();
            assert!(nonces.insert(nonce), "nonce repeated");
        }

        producer.await.unwrap();
        assert_eq!(nonces.len(), 5_000);
    }

    #[tokio::test]
    async fn test_finish_closes_write_side() {
        let (alice, _) = cipher_pair();
        let (near, mut far) = tokio::io::duplex(4096);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());

        writer.shutdown().await.unwrap();
        writer.shutdown().await.unwrap();

        let mut rest = Vec::new();
        far.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
        assert!(matches!(writer.send(b"late").await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_to_writer() {
        let (alice, _) = cipher_pair();
        let (near, far) = tokio::io::duplex(4096);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());
        drop(far);

        let mut outcome = Ok(());
        for _ in 0..10 {
            outcome = writer.send(b"into the void").await;
            if outcome.is_err() {
                break;
            }
        }

        assert!(matches!(outcome, Err(ChannelError::Transport(_))));
        assert!(writer.has_failed());
        assert!(matches!(writer.send(b"again").await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (alice, _) = cipher_pair();
        let (near, _far) = tokio::io::duplex(4096);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());

        writer.close();
        writer.close();

        assert!(matches!(writer.send(b"x").await, Err(ChannelError::Closed)));
        assert!(matches!(writer.finish().await, Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_flush_waits_for_queued_chunks() {
        let (alice, bob) = cipher_pair();
        let (near, far) = tokio::io::duplex(4096);
        let (mut writer, _) = writer_over(near, alice, &ChannelConfig::default());

        writer.write_all(b"hello").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        writer.flush().await.unwrap();
        writer.close();

        let frames: Vec<_> = raw_frames(far)
            .map(|frame| bob.open(&frame.unwrap()).unwrap())
            .collect()
            .await;
        assert_eq!(frames.concat(), b"helloworld");
    }

    #[tokio::test]
    async fn test_zero_length_transport_write_is_short_write() {
        let (alice, _) = cipher_pair();
        let counters = Arc::new(ChannelCounters::default());
        let mut writer = SecureWriter::spawn(
            ZeroSink,
            alice,
            &ChannelConfig::default(),
            counters.clone(),
        );

        writer.send(b"nobody listens").await.unwrap();
        assert!(matches!(writer.finish().await, Err(ChannelError::ShortWrite)));
        assert!(writer.has_failed());
        assert!(counters.has_failed());
        assert_eq!(counters.snapshot().frames_sent, 0);
    }

    #[tokio::test]
    async fn test_standalone_writer_feeds_standalone_reader() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let alice_public = alice.public_key_bytes();
        let writer_key = alice.diffie_hellman(&bob.public_key_bytes());
        let reader_key = bob.diffie_hellman(&alice_public);

        // Only one direction of each end is used.
        let (near, far) = tokio::io::duplex(4096);
        let (_, near_write) = tokio::io::split(near);
        let (far_read, _) = tokio::io::split(far);

        let config = ChannelConfig {
            write_chunk_size: 8,
            ..Default::default()
        };
        let mut writer = SecureWriter::new(near_write, &writer_key, &config).unwrap();
        let mut reader = SecureReader::new(far_read, &reader_key, &config).unwrap();

        writer.send(b"over a one-way pipe").await.unwrap();
        writer.finish().await.unwrap();

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"over a one-way pipe");
    }

    #[tokio::test]
    async fn test_standalone_constructors_validate_config() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        let key = alice.diffie_hellman(&bob.public_key_bytes());
        let config = ChannelConfig {
            write_chunk_size: 0,
            ..Default::default()
        };

        let (near, far) = tokio::io::duplex(64);
        assert!(matches!(
            SecureWriter::new(near, &key, &config),
            Err(ChannelError::Protocol(_))
        ));
        assert!(matches!(
            SecureReader::new(far, &key, &config),
            Err(ChannelError::Protocol(_))
        ));
    }
}
