//! Errors reported to callers of the connection manager

use std::io;
use thiserror::Error;

/// Every failure a link operation can report
///
/// None of these are fatal; they are handed back through the result of the
/// operation that caused them.
#[derive(Error, Debug)]
pub enum LinkError {
    /// The transport could not be opened
    #[error("Failed to open transport: {0}")]
    OpenFailed(#[source] io::Error),

    /// The remote endpoint did not answer the initial challenge in time
    #[error("Could not establish connection: no pong received")]
    VerificationTimeout,

    /// A send was attempted while the link is not open and alive
    #[error("Device not connected")]
    NotConnected,

    /// The transport rejected a write
    #[error("Write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// The transport closed while the initial challenge was outstanding
    #[error("Transport closed before the connection was verified")]
    TransportClosed,

    /// Another connect request is still waiting for its verification
    #[error("Connection attempt already in progress")]
    ConnectInProgress,

    /// The connection task has stopped
    #[error("Connection manager closed")]
    ManagerClosed,
}

/// Result type for link operations
pub type Result<T> = std::result::Result<T, LinkError>;
