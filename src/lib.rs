//! # rcon-bridge
//!
//! An async RCON client and a server that speaks RCON on behalf of a game
//! server whose only interface is a plain text console.
//!
//! ## Layers
//! - [`core`]: packet codec and stream framing
//! - [`protocol`]: request correlation and the client connection lifecycle
//! - [`transport`]: TCP connect, bind and accept loop
//! - [`service`]: the RCON client and the console bridge
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging
//!
//! ## Bridging a console
//! ```no_run
//! # async fn demo() -> rcon_bridge::error::Result<()> {
//! use rcon_bridge::{BridgeConfig, ConsoleBridge, ManagedConsole};
//! use std::process::Stdio;
//!
//! let mut child = tokio::process::Command::new("java")
//!     .args(["-jar", "server.jar", "nogui"])
//!     .stdin(Stdio::piped())
//!     .stdout(Stdio::piped())
//!     .spawn()?;
//!
//! let bridge = ConsoleBridge::new(BridgeConfig::default())?;
//! let server = bridge
//!     .listen(ManagedConsole::from_child(&mut child)?, 25575, "127.0.0.1")
//!     .await?;
//! println!("RCON on {}", server.local_addr());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use crate::config::{BridgeConfig, ClientConfig, LoggingConfig, RconConfig};
pub use crate::core::codec::PacketCodec;
pub use crate::core::packet::{packet_type, Packet};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::handshake::ConnectionState;
pub use crate::protocol::queue::{CorrelationQueue, ResponseTicket};
pub use crate::service::bridge::{BoundServer, ConsoleBridge};
pub use crate::service::client::RconClient;
pub use crate::service::console::{ConsoleHandle, ManagedConsole};
