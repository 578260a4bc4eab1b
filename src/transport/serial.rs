//! Serial port transport implementation (tokio-serial)

use crate::transport::traits::{TransportConnector, TransportStream};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

/// Baud rate the remote devices ship with
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial stream wrapper implementing TransportStream
pub struct SerialTransportStream {
    inner: SerialStream,
    path: String,
}

impl SerialTransportStream {
    /// Create a new serial transport stream
    pub fn new(stream: SerialStream, path: String) -> Self {
        Self {
            inner: stream,
            path,
        }
    }
}

impl AsyncRead for SerialTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SerialTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for SerialTransportStream {
    async fn close(&mut self) -> io::Result<()> {
        debug!("Closing serial port {}", self.path);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// Configuration for the serial connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. "/dev/ttyUSB0" or "COM3"
    pub path: String,
    /// Line speed
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".into(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Opens the configured serial device as 8N1 without flow control
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportConnector for SerialConnector {
    type Stream = SerialTransportStream;

    async fn open(&self) -> io::Result<Self::Stream> {
        let stream = tokio_serial::new(self.config.path.as_str(), self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;

        Ok(SerialTransportStream::new(stream, self.config.path.clone()))
    }

    fn name(&self) -> &'static str {
        "serial"
    }

    fn target(&self) -> &str {
        &self.config.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.path, "/dev/ttyUSB0");
    }

    #[test]
    fn test_serial_connector_identity() {
        let connector = SerialConnector::new(SerialConfig {
            path: "/dev/ttyACM0".into(),
            baud_rate: 115_200,
        });
        assert_eq!(connector.name(), "serial");
        assert_eq!(connector.target(), "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn test_open_missing_device_fails() {
        let connector = SerialConnector::new(SerialConfig {
            path: "/dev/linkwatch-no-such-device".into(),
            ..Default::default()
        });
        assert!(connector.open().await.is_err());
    }
}
