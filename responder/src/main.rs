//! Development peer for linkwatch
//!
//! Listens on TCP and answers every `ping` line with `pong`, logging any other
//! line. Set `RESPONDER_MAX_PONGS` to stop answering after that many pongs,
//! which looks like a device going silent.

use anyhow::Context;
use linkwatch_shared::{
    codec::{self, LineDecoder},
    PING, PONG,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_BIND: &str = "127.0.0.1:9600";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::var("RESPONDER_BIND").unwrap_or_else(|_| DEFAULT_BIND.into());
    let max_pongs = match std::env::var("RESPONDER_MAX_PONGS") {
        Ok(value) => Some(
            value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid RESPONDER_MAX_PONGS: {:?}", value))?,
        ),
        Err(_) => None,
    };

    let listener = TcpListener::bind(&bind).await?;
    info!("Responder listening on {}", bind);
    if let Some(max) = max_pongs {
        info!("  going silent after {} pongs", max);
    }

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        tokio::spawn(async move {
            match serve(socket, max_pongs).await {
                Ok(pongs) => info!("Client disconnected: {} ({} pongs sent)", addr, pongs),
                Err(e) => warn!("Connection error from {}: {}", addr, e),
            }
        });
    }
}

/// Answer pings until the client closes, returning how many pongs were sent
async fn serve<S>(mut socket: S, max_pongs: Option<u64>) -> anyhow::Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; 4096];
    let mut pongs = 0u64;

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(pongs);
        }
        decoder.extend(&buf[..n]);

        // Process all complete lines
        loop {
            match decoder.decode_next() {
                Ok(Some(line)) if line == PING => {
                    if max_pongs.is_some_and(|max| pongs >= max) {
                        debug!("Ignoring ping, pong budget spent");
                        continue;
                    }
                    socket.write_all(&codec::encode(PONG)).await?;
                    pongs += 1;
                }
                Ok(Some(line)) => info!("Received: {}", line),
                Ok(None) => break,
                Err(e) => {
                    warn!("Discarding input: {}", e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split};

    #[tokio::test]
    async fn test_answers_every_ping() {
        let (client, server) = duplex(256);
        let task = tokio::spawn(serve(server, None));

        let (mut reader, mut writer) = split(client);
        writer.write_all(b"ping\nhello\nping\r\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "pong\npong\n");
        assert_eq!(task.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_goes_silent_after_budget() {
        let (client, server) = duplex(256);
        let task = tokio::spawn(serve(server, Some(1)));

        let (mut reader, mut writer) = split(client);
        writer.write_all(b"ping\nping\nping\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        assert_eq!(out, "pong\n");
        assert_eq!(task.await.unwrap().unwrap(), 1);
    }
}
