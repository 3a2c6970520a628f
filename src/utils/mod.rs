//! # Utility Modules
//!
//! Supporting utilities for logging and timing.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Default deadlines and async timeout wrappers

pub mod logging;
pub mod timeout;
