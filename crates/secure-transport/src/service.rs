//! Dialing and serving secure channels over TCP

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use channel_protocol::ChannelConfig;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::handshake::Role;
use crate::{ChannelError, ChannelResult, SecureChannel};

/// Connect to `addr`, run the handshake as initiator and open a channel
pub async fn dial<A>(addr: A, config: &ChannelConfig) -> ChannelResult<SecureChannel>
where
    A: ToSocketAddrs,
{
    config.validate()?;

    let stream = TcpStream::connect(addr)
        .await
        .map_err(ChannelError::Transport)?;
    stream.set_nodelay(true).map_err(ChannelError::Transport)?;
    let peer = stream.peer_addr().ok();
    debug!(?peer, "connected, starting handshake");

    match SecureChannel::handshake(stream, Role::Initiator, config).await {
        Ok(channel) => {
            info!(?peer, "secure channel established");
            Ok(channel.with_peer_addr(peer))
        }
        Err(e) => {
            warn!(?peer, error = %e, "handshake failed");
            Err(e)
        }
    }
}

/// Accept connections forever, handing each established channel to `handler`
///
/// Every connection runs in its own task; a failed handshake or handler only
/// ends that connection. Returns only when `accept` itself fails.
pub async fn serve<H, Fut>(listener: TcpListener, config: ChannelConfig, handler: H) -> ChannelResult<()>
where
    H: Fn(SecureChannel) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = ChannelResult<()>> + Send + 'static,
{
    config.validate()?;
    let config = Arc::new(config);

    if let Ok(local) = listener.local_addr() {
        info!(%local, "accepting secure channels");
    }

    loop {
        let (stream, peer) = listener.accept().await.map_err(|e| {
            warn!(error = %e, "accept failed, stopping service loop");
            ChannelError::Transport(e)
        })?;

        let handler = handler.clone();
        let config = config.clone();
        let span = info_span!("connection", %peer);

        tokio::spawn(
            async move {
                match handle_connection(stream, peer, &config, handler).await {
                    Ok(()) => debug!("connection finished"),
                    Err(e) => warn!(error = %e, "connection failed"),
                }
            }
            .instrument(span),
        );
    }
}

/// [`serve`] with the [`echo`] handler
pub async fn serve_echo(listener: TcpListener, config: ChannelConfig) -> ChannelResult<()> {
    serve(listener, config, echo).await
}

/// Copy everything read from `channel` back into it, then half-close
pub async fn echo(channel: SecureChannel) -> ChannelResult<()> {
    let (mut reader, mut writer) = channel.into_split();

    let copied = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.finish().await?;

    debug!(bytes = copied, "echo finished");
    Ok(())
}

async fn handle_connection<H, Fut>(
    stream: TcpStream,
    peer: SocketAddr,
    config: &ChannelConfig,
    handler: H,
) -> ChannelResult<()>
where
    H: Fn(SecureChannel) -> Fut,
    Fut: Future<Output = ChannelResult<()>>,
{
    stream.set_nodelay(true).map_err(ChannelError::Transport)?;

    let channel = SecureChannel::handshake(stream, Role::Responder, config).await?;
    debug!("secure channel established");

    handler(channel.with_peer_addr(Some(peer))).await
}
