//! Timeout constants and async deadline wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default deadline for a single request/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default deadline for TCP connect plus authentication
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default deadline for one command routed through the managed console
pub const CONSOLE_TIMEOUT: Duration = Duration::from_millis(3000);

/// How long a server waits for open sessions during graceful shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for sessions to drain
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run `fut`, mapping an elapsed deadline to `on_timeout`.
pub async fn with_timeout<F, T>(fut: F, timeout: Duration, on_timeout: ProtocolError) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_result() {
        let out = with_timeout(async { Ok(5) }, Duration::from_millis(50), ProtocolError::PacketTimeout).await;
        assert_eq!(out.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn maps_elapsed_deadline() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        };
        let out = with_timeout(slow, Duration::from_millis(10), ProtocolError::ConnectTimeout).await;
        assert!(matches!(out, Err(ProtocolError::ConnectTimeout)));
    }
}
