//! # Transport Layer
//!
//! TCP plumbing shared by the RCON client and the console bridge.
//!
//! ## Components
//! - **TCP**: connect with deadline, bind, and an accept loop with graceful
//!   shutdown and connection accounting

pub mod tcp;
