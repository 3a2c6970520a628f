//! # Service Layer
//!
//! The two ends of the protocol.
//!
//! - [`client`]: connects to an RCON server and runs commands
//! - [`bridge`]: serves RCON on top of a managed process's text console
//! - [`console`]: the marker protocol the bridge uses to drive that console

pub mod bridge;
pub mod client;
pub mod console;
