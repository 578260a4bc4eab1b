//! linkwatch shared protocol pieces
//!
//! This crate provides the wire tokens, line codec and liveness state machine
//! used by the linkwatch connection manager and the development responder.
//! Nothing in here performs I/O.

pub mod codec;
pub mod error;
pub mod liveness;

pub use error::LinkError;
pub use liveness::{Action, LivenessMachine, Phase};

/// Challenge token sent to the remote endpoint
pub const PING: &str = "ping";

/// Response token expected for every challenge
pub const PONG: &str = "pong";

/// Heartbeat parameters for the link
pub mod heartbeat {
    /// Delay between an answered challenge and the next one
    pub const PING_INTERVAL_MS: u64 = 30_000;

    /// How long a challenge may stay unanswered before the link is declared dead
    pub const PING_TIMEOUT_MS: u64 = 10_000;

    /// Upper bound for opening the transport
    pub const OPEN_TIMEOUT_MS: u64 = 5_000;
}

/// Check whether a decoded line is a control token rather than application data
pub fn is_control_token(line: &str) -> bool {
    line == PING || line == PONG
}
