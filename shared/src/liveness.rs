//! Link Liveness State Machine
//!
//! Drives the handshake and heartbeat protocol without doing any I/O. The
//! connection manager feeds it transport and timer inputs and carries out the
//! returned [`Action`]s in order.
//!
//! ```text
//! Closed -> Verifying -> Idle <-> AwaitingPong
//!               |                     |
//!               v                     v
//!           Unverified <---------- (missed pong, closure requested)
//! ```

use std::time::Duration;

use crate::{error::LinkError, heartbeat, is_control_token, PONG};

/// Where the link currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No transport open
    Closed,
    /// Challenge sent after open, waiting for the first pong
    Verifying,
    /// Transport open but the remote is not known to answer
    Unverified,
    /// Link alive, next challenge not yet due
    Idle,
    /// Link alive, challenge sent, waiting for pong
    AwaitingPong,
}

impl Phase {
    /// Whether the remote has answered and no deadline has been missed since
    pub fn is_alive(self) -> bool {
        matches!(self, Phase::Idle | Phase::AwaitingPong)
    }
}

/// Side effects requested by the state machine
#[derive(Debug)]
pub enum Action {
    /// Write the challenge token to the transport
    SendChallenge,
    /// Replace any pending deadline with one that fires after the given delay
    ArmTimer(Duration),
    /// Drop the pending deadline
    CancelTimer,
    /// Close the transport; the driver reports completion through `on_closed`
    CloseTransport,
    /// Complete the in-flight connect request
    ResolveConnect(Result<(), LinkError>),
    /// Tell observers the verified link went away
    NotifyDisconnect,
    /// Hand a non-control line to observers
    Deliver(String),
}

/// Handshake and heartbeat state for one connection
#[derive(Debug)]
pub struct LivenessMachine {
    ping_interval: Duration,
    ping_timeout: Duration,
    phase: Phase,
    /// Handshake succeeded since the transport was last opened
    verified: bool,
}

impl Default for LivenessMachine {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(heartbeat::PING_INTERVAL_MS),
            Duration::from_millis(heartbeat::PING_TIMEOUT_MS),
        )
    }
}

impl LivenessMachine {
    /// Create a state machine for a closed transport
    pub fn new(ping_interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            ping_interval,
            ping_timeout,
            phase: Phase::Closed,
            verified: false,
        }
    }

    /// Get current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.phase.is_alive()
    }

    /// Whether a disconnect notification would be raised on closure
    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Send the initial challenge on a freshly opened or unverified transport
    ///
    /// Has no effect while a verification is pending or the link is alive.
    pub fn begin_verification(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Closed | Phase::Unverified => {
                self.phase = Phase::Verifying;
                vec![Action::SendChallenge, Action::ArmTimer(self.ping_timeout)]
            }
            Phase::Verifying | Phase::Idle | Phase::AwaitingPong => Vec::new(),
        }
    }

    /// Process one decoded line from the transport
    pub fn on_line(&mut self, line: &str) -> Vec<Action> {
        if line != PONG {
            // An echoed challenge is neither data nor an answer
            if is_control_token(line) {
                return Vec::new();
            }
            // Nobody is listening to a link that failed verification
            if self.phase == Phase::Unverified {
                return Vec::new();
            }
            return vec![Action::Deliver(line.to_owned())];
        }

        match self.phase {
            Phase::Verifying => {
                self.phase = Phase::Idle;
                self.verified = true;
                vec![
                    Action::ArmTimer(self.ping_interval),
                    Action::ResolveConnect(Ok(())),
                ]
            }
            Phase::AwaitingPong => {
                self.phase = Phase::Idle;
                vec![Action::ArmTimer(self.ping_interval)]
            }
            // Unsolicited pong: rescheduling here would leave two pings in flight
            Phase::Idle | Phase::Unverified | Phase::Closed => Vec::new(),
        }
    }

    /// Process expiry of the pending deadline
    pub fn on_timer(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Verifying => {
                self.phase = Phase::Unverified;
                vec![Action::ResolveConnect(Err(LinkError::VerificationTimeout))]
            }
            Phase::Idle => {
                self.phase = Phase::AwaitingPong;
                vec![Action::SendChallenge, Action::ArmTimer(self.ping_timeout)]
            }
            Phase::AwaitingPong => {
                self.phase = Phase::Unverified;
                vec![Action::CloseTransport]
            }
            Phase::Unverified | Phase::Closed => Vec::new(),
        }
    }

    /// Process closure of the transport, whoever initiated it
    pub fn on_closed(&mut self) -> Vec<Action> {
        let mut actions = vec![Action::CancelTimer];

        if self.phase == Phase::Verifying {
            actions.push(Action::ResolveConnect(Err(LinkError::TransportClosed)));
        }
        if self.verified {
            actions.push(Action::NotifyDisconnect);
        }

        self.phase = Phase::Closed;
        self.verified = false;
        actions
    }
}
