//! # Error Types
//!
//! Error handling for the RCON codec, client and console bridge.
//!
//! ## Error Categories
//! - **Decode Errors**: malformed packet bytes (bad length, bad trailer)
//! - **Session Errors**: authentication required or rejected
//! - **Timeouts**: per-packet and connect deadlines
//! - **Connection Errors**: socket failures and unexpected closes, broadcast
//!   to every request still pending on that connection
//!
//! Codec and framing errors are local and recoverable. Timeout and auth errors
//! reach only the caller awaiting that request. Nothing here is fatal to the
//! process.
//!
//! ## Example Usage
//! ```rust
//! use rcon_bridge::error::{ProtocolError, Result};
//! use rcon_bridge::Packet;
//!
//! fn first_payload(bytes: &[u8]) -> Result<String> {
//!     let packet = Packet::from_bytes(bytes)?;
//!     Ok(packet.payload)
//! }
//!
//! assert!(matches!(first_payload(&[0u8; 3]), Err(ProtocolError::Decode(_))));
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Decode errors
    pub const ERR_SHORT_PACKET: &str = "packet shorter than the 14 byte minimum";
    pub const ERR_LENGTH_MISMATCH: &str = "declared length does not match buffer size";
    pub const ERR_BAD_TRAILER: &str = "packet trailer is not two null bytes";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "connection closed by peer";
    pub const ERR_CONNECTION_RESET: &str = "connection reset while requests were pending";
    pub const ERR_CLIENT_CLOSED: &str = "client closed";
    pub const ERR_QUEUE_CLOSED: &str = "request queue is closed";
    pub const ERR_CONSOLE_CLOSED: &str = "managed console closed its output";

    /// State machine errors
    pub const ERR_ALREADY_CONNECTED: &str = "cannot connect: connection already in progress or open";
    pub const ERR_NOT_CONNECTING: &str = "cannot authenticate: not in Connecting state";
    pub const ERR_NOT_AUTHENTICATING: &str = "cannot complete auth: not in Authenticating state";
}

/// ProtocolError is the primary error type for all RCON operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Payload is not ASCII encodable")]
    NonAsciiPayload,

    #[error("Packet too large: {0} byte payload")]
    OversizedPacket(usize),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed!")]
    AuthFailed,

    #[error("Packet timed out!")]
    PacketTimeout,

    #[error("Connection timed out!")]
    ConnectTimeout,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Request id {0} is already outstanding")]
    DuplicateId(i32),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Timeouts leave the connection usable; callers may retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PacketTimeout | Self::ConnectTimeout)
    }

    /// Errors that mean the underlying connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Io(_))
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
