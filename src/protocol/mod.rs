//! # Protocol Layer
//!
//! Request bookkeeping above the packet codec.
//!
//! - [`queue`]: correlation of responses to requests by id, bounded
//!   concurrency, per-request timeouts
//! - [`handshake`]: client connection lifecycle and AUTH frames

pub mod handshake;
pub mod queue;
