//! Connection management for a liveness-verified serial link
//!
//! This module handles:
//! - Opening the transport and verifying the remote answers before use
//! - Periodic ping/pong heartbeat with timeout-driven disconnect detection
//! - Gating application sends on link liveness
//! - Disconnect notification to observers

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager, LinkStatus};
