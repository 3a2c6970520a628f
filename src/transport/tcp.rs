use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{self, with_timeout};

/// Limits applied by [`serve`]
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Connections beyond this are closed right after accept
    pub max_connections: usize,
    /// How long shutdown waits for open connections
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            max_connections: 16,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

/// Bind a listener, logging the resolved address.
#[instrument(skip(addr))]
pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await?;
    info!(address = %listener.local_addr()?, "Listening");
    Ok(listener)
}

/// Open a TCP connection, failing with [`ProtocolError::ConnectTimeout`]
/// if it is not established within `timeout`.
#[instrument(skip(addr))]
pub async fn connect<A: ToSocketAddrs>(addr: A, timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout(
        async { Ok(TcpStream::connect(addr).await?) },
        timeout,
        ProtocolError::ConnectTimeout,
    )
    .await?;
    stream.set_nodelay(true)?;
    debug!(peer = ?stream.peer_addr().ok(), "Connected");
    Ok(stream)
}

/// One counted connection. Dropped when its task ends, panics included.
struct ConnectionSlot {
    active: Arc<AtomicUsize>,
    peer: SocketAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        info!(peer = %self.peer, "Connection closed");
    }
}

/// Accept connections until `shutdown_rx` fires, running `handler` for each.
///
/// Handlers receive a `watch` receiver that flips to `true` when shutdown
/// starts so they can stop reading and flush. After the signal no new
/// connections are accepted and the call returns once every handler has
/// finished or `shutdown_timeout` passes.
#[instrument(skip(listener, shutdown_rx, handler), fields(address = ?listener.local_addr().ok()))]
pub async fn serve<H, Fut>(
    listener: TcpListener,
    mut shutdown_rx: mpsc::Receiver<()>,
    options: ServeOptions,
    handler: H,
) -> Result<()>
where
    H: Fn(TcpStream, SocketAddr, watch::Receiver<bool>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    let (closing_tx, closing_rx) = watch::channel(false);

    // Track active connections
    let active_connections = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                let _ = closing_tx.send(true);

                let deadline = tokio::time::sleep(options.shutdown_timeout);
                tokio::pin!(deadline);

                loop {
                    let connections = active_connections.load(Ordering::SeqCst);
                    if connections == 0 {
                        info!("All connections closed, shutting down");
                        break;
                    }
                    tokio::select! {
                        _ = &mut deadline => {
                            warn!(connections, "Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(timeout::SHUTDOWN_POLL_INTERVAL) => {
                            debug!(connections, "Waiting for connections to close");
                        }
                    }
                }

                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        // Only this loop increments, so load-then-add cannot overshoot.
                        if active_connections.load(Ordering::SeqCst) >= options.max_connections {
                            warn!(peer = %peer, limit = options.max_connections, "Connection limit reached, rejecting");
                            continue;
                        }
                        active_connections.fetch_add(1, Ordering::SeqCst);
                        let slot = ConnectionSlot {
                            active: active_connections.clone(),
                            peer,
                        };
                        info!(peer = %peer, "New connection established");

                        let handler = handler.clone();
                        let closing = closing_rx.clone();
                        tokio::spawn(async move {
                            let _slot = slot;
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "Could not disable Nagle");
                            }
                            handler(stream, peer, closing).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}
