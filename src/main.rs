mod config;
mod connection;
mod transport;

use config::{AppConfig, TransportConfig};
use connection::{ConnectionEvent, ConnectionManager, LinkStatus};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use transport::{SerialConnector, TcpConnector};

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = AppConfig::from_env()?;

    info!("linkwatch starting: {}", config.transport);

    let mut conn = match &config.transport {
        TransportConfig::Serial(serial) => {
            ConnectionManager::new(config.connection.clone(), SerialConnector::new(serial.clone()))
        }
        TransportConfig::Tcp { address } => {
            ConnectionManager::new(config.connection.clone(), TcpConnector::new(address.clone()))
        }
    };
    info!(
        "  ping interval: {:?}, ping timeout: {:?}",
        conn.config().ping_interval,
        conn.config().ping_timeout
    );

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match conn.connect().await {
            Ok(()) => {
                info!("Connected to device");
                reconnect_delay = config.reconnect_delay; // Reset delay

                match run_session(&mut conn, &mut stdin, &mut stdin_open).await? {
                    SessionEnd::Disconnected => {
                        let LinkStatus { open, alive } = conn.status();
                        debug!("Link after disconnect: open={}, alive={}", open, alive);
                    }
                    SessionEnd::Shutdown => break,
                }
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                if conn.is_open() {
                    info!("Transport left open, next attempt verifies again");
                }
            }
        }

        // Wait before reconnecting
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        // Exponential backoff
        reconnect_delay = next_delay(reconnect_delay, config.max_reconnect_delay);
    }

    info!("Shutting down");
    if conn.is_connected() {
        info!("Closing verified link");
    }
    conn.close().await?;
    Ok(())
}

/// Why a connected session ended
enum SessionEnd {
    Disconnected,
    Shutdown,
}

/// Forward stdin lines to the device until the link drops
async fn run_session<R>(
    conn: &mut ConnectionManager,
    stdin: &mut tokio::io::Lines<R>,
    stdin_open: &mut bool,
) -> anyhow::Result<SessionEnd>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(ConnectionEvent::Received(line)) => {
                    info!("Device: {}", line);
                }
                Some(ConnectionEvent::Disconnected) => {
                    warn!("Device disconnected");
                    return Ok(SessionEnd::Disconnected);
                }
                None => {
                    anyhow::bail!("Connection manager closed");
                }
            },

            line = stdin.next_line(), if *stdin_open => match line {
                Ok(Some(line)) => {
                    if let Err(e) = conn.send_data(line).await {
                        warn!("Failed to send data: {}", e);
                    }
                }
                Ok(None) => {
                    info!("Input closed, monitoring link only");
                    *stdin_open = false;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    *stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(1);
        let mut seen = Vec::new();
        for _ in 0..7 {
            delay = next_delay(delay, max);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
    }
}
