//! Process configuration read from the environment

use crate::connection::ConnectionConfig;
use crate::transport::{SerialConfig, DEFAULT_BAUD_RATE};
use anyhow::{Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_SERIAL_PORT: &str = "LINKWATCH_SERIAL_PORT";
pub const ENV_BAUD_RATE: &str = "LINKWATCH_BAUD_RATE";
pub const ENV_TCP_ADDRESS: &str = "LINKWATCH_TCP_ADDRESS";
pub const ENV_PING_INTERVAL_MS: &str = "LINKWATCH_PING_INTERVAL_MS";
pub const ENV_PING_TIMEOUT_MS: &str = "LINKWATCH_PING_TIMEOUT_MS";

/// Which transport the link runs over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportConfig {
    Serial(SerialConfig),
    /// TCP peer, e.g. the responder
    Tcp { address: String },
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Serial(serial) => {
                write!(f, "serial {} @ {} baud", serial.path, serial.baud_rate)
            }
            TransportConfig::Tcp { address } => write!(f, "tcp {}", address),
        }
    }
}

/// Top-level configuration for the linkwatch binary
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub connection: ConnectionConfig,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::Serial(SerialConfig::default()),
            connection: ConnectionConfig::default(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Build the configuration from `LINKWATCH_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(address) = lookup(ENV_TCP_ADDRESS) {
            config.transport = TransportConfig::Tcp { address };
        } else {
            let mut serial = SerialConfig::default();
            if let Some(path) = lookup(ENV_SERIAL_PORT) {
                serial.path = path;
            }
            serial.baud_rate = parse_or(&lookup, ENV_BAUD_RATE, DEFAULT_BAUD_RATE)?;
            config.transport = TransportConfig::Serial(serial);
        }

        if let Some(ms) = parse(&lookup, ENV_PING_INTERVAL_MS)? {
            config.connection = config.connection.with_ping_interval_ms(ms);
        }
        if let Some(ms) = parse(&lookup, ENV_PING_TIMEOUT_MS)? {
            config.connection = config.connection.with_ping_timeout_ms(ms);
        }

        Ok(config)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid {}: {:?}", key, value))
        })
        .transpose()
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(parse(lookup, key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.transport, TransportConfig::Serial(SerialConfig::default()));
        assert_eq!(config.connection.ping_interval, Duration::from_secs(30));
        assert_eq!(config.connection.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_serial_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_SERIAL_PORT, "/dev/ttyACM0"),
            (ENV_BAUD_RATE, "115200"),
            (ENV_PING_INTERVAL_MS, "5000"),
            (ENV_PING_TIMEOUT_MS, " 2000 "),
        ]))
        .unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Serial(SerialConfig {
                path: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
            })
        );
        assert_eq!(config.connection.ping_interval, Duration::from_millis(5000));
        assert_eq!(config.connection.ping_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_tcp_takes_precedence() {
        let config = AppConfig::from_lookup(lookup_from(&[
            (ENV_SERIAL_PORT, "/dev/ttyACM0"),
            (ENV_TCP_ADDRESS, "127.0.0.1:9600"),
        ]))
        .unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Tcp {
                address: "127.0.0.1:9600".into()
            }
        );
        assert_eq!(config.transport.to_string(), "tcp 127.0.0.1:9600");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[(ENV_PING_TIMEOUT_MS, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_PING_TIMEOUT_MS));
    }

    #[test]
    fn test_serial_display() {
        let transport = TransportConfig::Serial(SerialConfig::default());
        assert_eq!(transport.to_string(), "serial /dev/ttyUSB0 @ 9600 baud");
    }
}
