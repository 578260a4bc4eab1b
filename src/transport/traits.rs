//! Transport trait abstraction for pluggable link backends

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream to the remote endpoint
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn close(&mut self) -> io::Result<()>;
}

/// Factory for opening transport streams
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to open the transport, returning a stream on success
    async fn open(&self) -> io::Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;

    /// Device path or address the transport points at
    fn target(&self) -> &str;
}
