//! RCON client.
//!
//! One TCP connection, authenticated once, carrying any number of concurrent
//! commands. Every request is followed by an END sentinel with the same id;
//! the server's "unknown request" echo of that sentinel marks the end of a
//! possibly multi-packet reply.
//!
//! ```no_run
//! # async fn demo() -> rcon_bridge::error::Result<()> {
//! use rcon_bridge::{ClientConfig, RconClient};
//! use std::time::Duration;
//!
//! let client = RconClient::new(ClientConfig::default());
//! client.connect("hunter2", "localhost", 25575, Duration::from_millis(1500)).await?;
//! let players = client.command("list", Duration::from_millis(1500)).await?;
//! println!("{players}");
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::codec::PacketCodec;
use crate::core::packet::{packet_type, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{auth_request, is_auth_rejection, request_frames, ConnectionState};
use crate::protocol::queue::CorrelationQueue;
use crate::transport::tcp;

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    /// Bumped on every connect so tasks of an old connection cannot touch a new one
    generation: u64,
    queue: Option<CorrelationQueue>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn teardown(&mut self, reason: &str) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(queue) = self.queue.take() {
            queue.fail_all(reason);
        }
        self.state.close();
    }
}

type SharedSession = Arc<Mutex<Session>>;

fn lock(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Async RCON client. Methods take `&self`; share it behind an `Arc` to issue
/// commands from several tasks.
#[derive(Debug)]
pub struct RconClient {
    config: ClientConfig,
    session: SharedSession,
}

impl Default for RconClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl RconClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        lock(&self.session).state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        lock(&self.session).state.is_authenticated()
    }

    /// Connect and authenticate.
    ///
    /// `timeout` covers the TCP connect and the AUTH round trip together.
    /// A rejected password fails with [`ProtocolError::AuthFailed`] and leaves
    /// the client `Closed`; so does any other failure.
    #[instrument(skip(self, password))]
    pub async fn connect(&self, password: &str, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let generation = {
            let mut session = lock(&self.session);
            session.state.begin_connect()?;
            session.generation += 1;
            session.generation
        };

        match self.establish(password, host, port, timeout, generation).await {
            Ok(()) => {
                info!(host, port, "Authenticated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, host, port, "Connect failed");
                let mut session = lock(&self.session);
                if session.generation == generation {
                    session.teardown(constants::ERR_CONNECTION_CLOSED);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        password: &str,
        host: &str,
        port: u16,
        timeout: Duration,
        generation: u64,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let stream = tcp::connect((host, port), timeout).await?;
        let (read_half, write_half) = stream.into_split();

        let (queue, outbound) = CorrelationQueue::channel(self.config.max_in_flight);
        let auth_id = queue.allocate_id();

        {
            let mut session = lock(&self.session);
            if session.generation != generation {
                return Err(ProtocolError::ConnectionError(constants::ERR_CLIENT_CLOSED.into()));
            }
            let writer = tokio::spawn(write_loop(
                FramedWrite::new(write_half, PacketCodec::new()),
                outbound,
                self.session.clone(),
                generation,
            ));
            let reader = tokio::spawn(read_loop(
                FramedRead::new(read_half, PacketCodec::new()),
                queue.clone(),
                auth_id,
                self.session.clone(),
                generation,
            ));
            session.tasks = vec![reader, writer];
            session.queue = Some(queue.clone());
            session.state.begin_auth()?;
        }

        let ticket = queue.submit(auth_id, auth_request(auth_id, password)?)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match ticket.wait(remaining).await {
            Ok(_) => {}
            Err(ProtocolError::PacketTimeout) => return Err(ProtocolError::ConnectTimeout),
            Err(e) => return Err(e),
        }

        let mut session = lock(&self.session);
        if session.generation != generation {
            return Err(ProtocolError::ConnectionError(constants::ERR_CLIENT_CLOSED.into()));
        }
        session.state.complete_auth()
    }

    /// Send `payload` as a request of `request_type` and collect every packet
    /// answering it, in arrival order.
    pub async fn send(&self, payload: &str, request_type: i32, timeout: Duration) -> Result<Vec<Packet>> {
        let queue = {
            let session = lock(&self.session);
            if !session.state.is_authenticated() {
                return Err(ProtocolError::AuthRequired);
            }
            session.queue.clone().ok_or(ProtocolError::AuthRequired)?
        };

        let ticket = queue.submit_with(|id| request_frames(id, request_type, payload))?;
        debug!(id = ticket.id(), request_type, "Request submitted");
        ticket.wait(timeout).await
    }

    /// Run a console command and return its output.
    ///
    /// Multi-packet replies are concatenated in arrival order.
    #[instrument(skip(self))]
    pub async fn command(&self, text: &str, timeout: Duration) -> Result<String> {
        let packets = self.send(text, packet_type::COMMAND, timeout).await?;
        Ok(packets.into_iter().map(|p| p.payload).collect())
    }

    /// [`command`](Self::command) with the configured response timeout.
    pub async fn execute(&self, text: &str) -> Result<String> {
        self.command(text, self.config.response_timeout).await
    }

    /// Drop the connection. Pending commands fail with
    /// [`ProtocolError::ConnectionError`]; the client may connect again.
    pub fn close(&self) {
        let mut session = lock(&self.session);
        session.generation += 1;
        session.teardown(constants::ERR_CLIENT_CLOSED);
        debug!("Client closed");
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        lock(&self.session).teardown(constants::ERR_CLIENT_CLOSED);
    }
}

/// Tear the session down if it still belongs to `generation`.
fn connection_lost(session: &SharedSession, generation: u64, reason: &str) {
    let mut session = lock(session);
    if session.generation != generation {
        return;
    }
    if !session.state.is_closed() {
        warn!(reason, state = %session.state, "Connection lost");
    }
    session.teardown(reason);
}

async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, PacketCodec>,
    queue: CorrelationQueue,
    auth_id: i32,
    session: SharedSession,
    generation: u64,
) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(packet)) => {
                if is_auth_rejection(&packet) {
                    let authenticating = matches!(lock(&session).state, ConnectionState::Authenticating);
                    if authenticating {
                        queue.reject(auth_id, ProtocolError::AuthFailed);
                        continue;
                    }
                }
                if packet.is_end_echo() {
                    queue.complete(packet.id);
                } else {
                    queue.deliver(packet);
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Read failed");
                break constants::ERR_CONNECTION_RESET;
            }
            None => break constants::ERR_CONNECTION_CLOSED,
        }
    };
    connection_lost(&session, generation, reason);
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, PacketCodec>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    session: SharedSession,
    generation: u64,
) {
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = sink.send(packet).await {
            warn!(error = %e, "Write failed");
            connection_lost(&session, generation, constants::ERR_CONNECTION_RESET);
            return;
        }
    }
}
