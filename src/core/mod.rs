//! # Core Protocol Components
//!
//! Packet encoding/decoding and stream framing for the RCON wire format.
//!
//! ## Components
//! - **Packet**: pure encode/decode of a single RCON packet, no I/O
//! - **Codec**: Tokio codec that turns a raw byte stream into packets
//!
//! ## Wire Format
//! ```text
//! [Length(4, LE)] [Id(4, LE)] [Type(4, LE)] [Payload(N, ASCII)] [0x00 0x00]
//! ```
//! `Length` covers everything after itself, so a packet occupies
//! `Length + 4` bytes on the wire.
//!
//! ## Limits
//! - Maximum payload: 32767 bytes
//! - Length is validated before any payload is copied

pub mod codec;
pub mod packet;
