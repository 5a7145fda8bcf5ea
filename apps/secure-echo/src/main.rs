//! Sealed Echo
//!
//! `secure-echo -l <port>` serves an encrypted echo on that port.
//! `secure-echo <port> <message>` dials localhost, sends the message over a
//! fresh secure channel and prints what comes back.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Parser;
use secure_transport::ChannelConfig;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "secure-echo")]
#[command(about = "Encrypted, authenticated echo over TCP")]
struct Args {
    /// Listen mode: serve the echo on this port
    #[arg(short = 'l', value_name = "PORT", conflicts_with_all = ["port", "message"])]
    listen: Option<u16>,

    /// Channel settings file (JSON)
    #[arg(long, env = "SECURE_ECHO_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Port on localhost to dial
    #[arg(required_unless_present = "listen")]
    port: Option<u16>,

    /// Message to send
    #[arg(required_unless_present = "listen")]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing() {
        eprintln!("failed to initialise logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("secure_echo=info".parse()?)
                .add_directive("secure_transport=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    if let Some(port) = args.listen {
        return serve(port, config).await;
    }

    let (Some(port), Some(message)) = (args.port, args.message) else {
        bail!("usage: secure-echo <port> <message>");
    };

    let echoed = send_message(port, &message, &config).await?;
    println!("{}", String::from_utf8_lossy(&echoed));

    Ok(())
}

async fn serve(port: u16, config: ChannelConfig) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to listen on port {port}"))?;

    info!(port, "secure echo server listening");

    secure_transport::serve_echo(listener, config)
        .await
        .context("service loop stopped")
}

async fn send_message(port: u16, message: &str, config: &ChannelConfig) -> Result<Vec<u8>> {
    let mut channel = secure_transport::dial(("localhost", port), config)
        .await
        .with_context(|| format!("failed to open secure channel to localhost:{port}"))?;

    channel
        .send(message.as_bytes())
        .await
        .context("failed to send message")?;
    channel.finish().await.context("failed to flush message")?;

    let mut echoed = Vec::new();
    channel
        .read_to_end(&mut echoed)
        .await
        .context("failed to read echo")?;
    channel.close();

    Ok(echoed)
}

fn load_config(path: Option<&Path>) -> Result<ChannelConfig> {
    let Some(path) = path else {
        return Ok(ChannelConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: ChannelConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config.validate().context("invalid channel config")?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_mode() {
        let args = Args::try_parse_from(["secure-echo", "-l", "4000"]).unwrap();
        assert_eq!(args.listen, Some(4000));
        assert!(args.port.is_none());
    }

    #[test]
    fn test_client_mode() {
        let args = Args::try_parse_from(["secure-echo", "4000", "hello world"]).unwrap();
        assert_eq!(args.listen, None);
        assert_eq!(args.port, Some(4000));
        assert_eq!(args.message.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_client_mode_needs_message() {
        assert!(Args::try_parse_from(["secure-echo", "4000"]).is_err());
        assert!(Args::try_parse_from(["secure-echo"]).is_err());
    }

    #[test]
    fn test_default_config_without_file() {
        assert_eq!(load_config(None).unwrap(), ChannelConfig::default());
    }

    #[test]
    fn test_config_file_is_validated() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("secure-echo-good-{}.json", std::process::id()));
        let bad = dir.join(format!("secure-echo-bad-{}.json", std::process::id()));
        std::fs::write(&good, r#"{"write_chunk_size": 2048}"#).unwrap();
        std::fs::write(&bad, r#"{"max_frame_size": 100, "write_chunk_size": 100}"#).unwrap();

        assert_eq!(load_config(Some(&good)).unwrap().write_chunk_size, 2048);
        assert!(load_config(Some(&bad)).is_err());

        std::fs::remove_file(good).unwrap();
        std::fs::remove_file(bad).unwrap();
    }

    #[tokio::test]
    async fn test_client_against_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(secure_transport::serve_echo(listener, ChannelConfig::default()));

        let echoed = send_message(port, "hello", &ChannelConfig::default()).await.unwrap();
        assert_eq!(echoed, b"hello");
    }
}
