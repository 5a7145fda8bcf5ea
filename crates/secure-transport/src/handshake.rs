//! Public key exchange
//!
//! Each side sends one raw 32-byte X25519 public key in the clear, the
//! connecting side first. There is no framing, versioning or identity check.

use channel_crypto::{KeyPair, PUBLIC_KEY_SIZE, SharedKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::{ChannelError, ChannelResult};

/// Which side of the handshake we play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We opened the connection and send our key first
    Initiator,
    /// We accepted the connection and answer with our key
    Responder,
}

/// Run the handshake for `role` over a freshly connected stream
pub async fn perform<S>(stream: &mut S, role: Role) -> ChannelResult<SharedKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match role {
        Role::Initiator => initiate(stream).await,
        Role::Responder => respond(stream).await,
    }
}

/// Client side: send our public key, then read the peer's
pub async fn initiate<S>(stream: &mut S) -> ChannelResult<SharedKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keypair = KeyPair::generate();

    send_public_key(stream, &keypair).await?;
    let their_public = recv_public_key(stream).await?;

    debug!("handshake complete as initiator");
    Ok(keypair.diffie_hellman(&their_public))
}

/// Server side: read the peer's public key, then send ours
pub async fn respond<S>(stream: &mut S) -> ChannelResult<SharedKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let keypair = KeyPair::generate();

    let their_public = recv_public_key(stream).await?;
    send_public_key(stream, &keypair).await?;

    debug!("handshake complete as responder");
    Ok(keypair.diffie_hellman(&their_public))
}

async fn send_public_key<S>(stream: &mut S, keypair: &KeyPair) -> ChannelResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&keypair.public_key_bytes())
        .await
        .map_err(ChannelError::Transport)?;
    stream.flush().await.map_err(ChannelError::Transport)
}

async fn recv_public_key<S>(stream: &mut S) -> ChannelResult<[u8; PUBLIC_KEY_SIZE]>
where
    S: AsyncRead + Unpin,
{
    let mut their_public = [0u8; PUBLIC_KEY_SIZE];

    // Any failure before all 32 bytes arrive leaves the handshake incomplete.
    stream.read_exact(&mut their_public).await.map_err(|e| {
        debug!(error = %e, "peer public key not received");
        ChannelError::HandshakeIncomplete
    })?;

    Ok(their_public)
}
