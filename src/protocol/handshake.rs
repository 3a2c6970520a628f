//! Client connection lifecycle and the AUTH exchange.
//!
//! ```text
//!  Disconnected ──► Connecting ──► Authenticating ──► Authenticated
//!                        │                │                 │
//!                        ▼                ▼                 ▼
//!                        └──────────► Closed ◄──────────────┘
//!                                       │
//!                                       └──► Connecting (reconnect)
//! ```
//!
//! Transitions return `Result` instead of panicking so a late event (socket
//! closing after a timeout, say) cannot corrupt the state.

use crate::core::packet::{packet_type, Packet, AUTH_FAILED_ID};
use crate::error::{constants, ProtocolError, Result};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Disconnected,

    /// TCP connect in progress
    Connecting,

    /// Socket is up, AUTH sent, waiting for the server's verdict
    Authenticating,

    /// Commands may be sent
    Authenticated {
        /// When authentication succeeded
        since: Instant,
    },

    /// Connection torn down (auth rejected, socket error, or `close`)
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Authenticating => write!(f, "Authenticating"),
            Self::Authenticated { .. } => write!(f, "Authenticated"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl ConnectionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been authenticated, if it is.
    pub fn authenticated_for(&self) -> Option<std::time::Duration> {
        match self {
            Self::Authenticated { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    /// Valid from: `Disconnected`, `Closed`.
    pub fn begin_connect(&mut self) -> Result<()> {
        match self {
            Self::Disconnected | Self::Closed => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState(constants::ERR_ALREADY_CONNECTED)),
        }
    }

    /// Valid from: `Connecting`.
    pub fn begin_auth(&mut self) -> Result<()> {
        match self {
            Self::Connecting => {
                *self = Self::Authenticating;
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState(constants::ERR_NOT_CONNECTING)),
        }
    }

    /// Valid from: `Authenticating`.
    pub fn complete_auth(&mut self) -> Result<()> {
        match self {
            Self::Authenticating => {
                *self = Self::Authenticated {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(ProtocolError::InvalidState(constants::ERR_NOT_AUTHENTICATING)),
        }
    }

    /// Move to `Closed` from any state. Returns whether anything changed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Self::Closed;
        true
    }
}

/// Frames for a login attempt: AUTH carrying the password, then the END
/// sentinel with the same id.
pub fn auth_request(id: i32, password: &str) -> Result<Vec<Packet>> {
    Ok(vec![
        Packet::new(id, packet_type::AUTH, password)?,
        Packet::end(id),
    ])
}

/// Frames for a request of any type followed by its END sentinel.
pub fn request_frames(id: i32, request_type: i32, payload: &str) -> Result<Vec<Packet>> {
    Ok(vec![
        Packet::new(id, request_type, payload)?,
        Packet::end(id),
    ])
}

/// Whether a packet received while authenticating rejects the login.
pub fn is_auth_rejection(packet: &Packet) -> bool {
    packet.id == AUTH_FAILED_ID
}
