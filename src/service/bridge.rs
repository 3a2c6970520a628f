//! # Console Bridge
//!
//! Serves the RCON protocol on top of a managed process's text console.
//!
//! Each TCP session tracks its own authentication and answers its requests
//! strictly in the order they arrived. AUTH always succeeds (the console has
//! no notion of a password), commands from unauthenticated sessions are
//! answered with id `-1`, and unknown packet types get the standard
//! "Unknown request" reply. Only authenticated COMMAND packets reach the
//! console, through the shared [`ConsoleHandle`] that serializes them across
//! all sessions.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, instrument, warn};

use crate::config::{BridgeConfig, RESPONSE_CHUNK_SIZE};
use crate::core::codec::PacketCodec;
use crate::core::packet::{packet_type, unknown_request_payload, Packet, AUTH_FAILED_ID};
use crate::error::{ProtocolError, Result};
use crate::protocol::queue::ResponseTicket;
use crate::service::console::{ConsoleHandle, ConsoleTasks, ManagedConsole, MarkerProtocol};
use crate::transport::tcp::{self, ServeOptions};

/// A reply slot in a session's ordered output
#[derive(Debug)]
enum Reply {
    /// Answer known without the console
    Ready(Packet),
    /// Answer produced by the console under its own id, sent back as `client_id`
    Console { client_id: i32, ticket: ResponseTicket },
}

/// Split a response into packets of at most [`RESPONSE_CHUNK_SIZE`] payload
/// bytes sharing `id`. An empty payload still yields one packet.
pub fn split_response(id: i32, response_type: i32, payload: &str) -> Vec<Packet> {
    if payload.is_empty() {
        return vec![Packet {
            id,
            packet_type: response_type,
            payload: String::new(),
        }];
    }
    payload
        .as_bytes()
        .chunks(RESPONSE_CHUNK_SIZE)
        .map(|chunk| Packet {
            id,
            packet_type: response_type,
            payload: String::from_utf8_lossy(chunk).into_owned(),
        })
        .collect()
}

/// RCON server backed by a text console.
#[derive(Debug, Clone)]
pub struct ConsoleBridge {
    config: BridgeConfig,
    protocol: MarkerProtocol,
}

impl ConsoleBridge {
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let protocol = MarkerProtocol::new(&config.marker_address, &config.line_separator)?;
        Ok(Self { config, protocol })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Bridge `console` and accept RCON clients on `host:port`.
    #[instrument(skip(self, console))]
    pub async fn listen<W, R>(&self, console: ManagedConsole<W, R>, port: u16, host: &str) -> Result<BoundServer>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let listener = tcp::bind((host, port)).await?;
        self.serve(console, listener)
    }

    /// [`listen`](Self::listen) on the configured address.
    pub async fn listen_configured<W, R>(&self, console: ManagedConsole<W, R>) -> Result<BoundServer>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let listener = tcp::bind(self.config.address.as_str()).await?;
        self.serve(console, listener)
    }

    /// Bridge `console` over an already bound listener.
    pub fn serve<W, R>(&self, console: ManagedConsole<W, R>, listener: TcpListener) -> Result<BoundServer>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        let (handle, console_tasks) = ConsoleHandle::spawn(
            console,
            self.protocol.clone(),
            self.config.console_timeout,
            self.config.prime_console,
            self.config.max_response_bytes,
        );

        let options = ServeOptions {
            max_connections: self.config.max_connections,
            shutdown_timeout: self.config.shutdown_timeout,
        };
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let server = tokio::spawn(tcp::serve(listener, shutdown_rx, options, move |stream, peer, closing| {
            run_session(stream, peer, closing, handle.clone())
        }));

        info!(address = %local_addr, marker = self.protocol.marker_address(), "Console bridge listening");
        Ok(BoundServer {
            local_addr,
            shutdown_tx,
            server,
            console_tasks,
        })
    }
}

/// A running bridge. Dropping it stops the accept loop and releases the
/// console right away; open sessions get the closing signal but nothing
/// waits for them. Use [`shutdown`](Self::shutdown) to let them flush.
#[derive(Debug)]
pub struct BoundServer {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    server: JoinHandle<Result<()>>,
    console_tasks: ConsoleTasks,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, let open sessions flush their replies, then release
    /// the console.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(()).await;
        let result = self
            .server
            .await
            .map_err(|e| ProtocolError::Custom(format!("server task failed: {e}")));
        self.console_tasks.abort();
        info!(address = %self.local_addr, "Console bridge stopped");
        result?
    }
}

/// Decide how to answer one request. Only authenticated commands touch the
/// console.
fn dispatch(console: &ConsoleHandle, authenticated: &mut bool, packet: Packet) -> Result<Reply> {
    let reply = match packet.packet_type {
        packet_type::AUTH => {
            *authenticated = true;
            Reply::Ready(Packet {
                id: packet.id,
                packet_type: packet_type::AUTH_RESPONSE,
                payload: String::new(),
            })
        }
        packet_type::COMMAND if !*authenticated => {
            debug!(id = packet.id, "Rejecting command on unauthenticated session");
            Reply::Ready(Packet {
                id: AUTH_FAILED_ID,
                packet_type: packet_type::COMMAND_RESPONSE,
                payload: String::new(),
            })
        }
        packet_type::COMMAND => Reply::Console {
            client_id: packet.id,
            ticket: console.submit(packet_type::COMMAND, &packet.payload)?,
        },
        other => Reply::Ready(Packet {
            id: packet.id,
            packet_type: packet_type::COMMAND_RESPONSE,
            payload: unknown_request_payload(other),
        }),
    };
    Ok(reply)
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    mut closing: watch::Receiver<bool>,
    console: ConsoleHandle,
) {
    let (read_half, write_half) = stream.into_split();
    let mut requests = FramedRead::new(read_half, PacketCodec::new());
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(
        FramedWrite::new(write_half, PacketCodec::new()),
        reply_rx,
        console.clone(),
        peer,
    ));

    let mut authenticated = false;
    loop {
        let packet = tokio::select! {
            _ = closing.changed() => break,
            next = requests.next() => match next {
                Some(Ok(packet)) => packet,
                Some(Err(e)) => {
                    debug!(peer = %peer, error = %e, "Read failed");
                    break;
                }
                None => break,
            },
        };

        let reply = match dispatch(&console, &mut authenticated, packet) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %peer, error = %e, "Console unavailable, closing session");
                break;
            }
        };
        if reply_tx.send(reply).is_err() {
            break;
        }
    }

    drop(reply_tx);
    let _ = writer.await;
}

async fn write_replies(
    mut sink: FramedWrite<OwnedWriteHalf, PacketCodec>,
    mut replies: mpsc::UnboundedReceiver<Reply>,
    console: ConsoleHandle,
    peer: SocketAddr,
) {
    while let Some(reply) = replies.recv().await {
        let packets = match reply {
            Reply::Ready(packet) => vec![packet],
            Reply::Console { client_id, ticket } => {
                let console_id = ticket.id();
                match ticket.wait(console.timeout()).await {
                    Ok(responses) => responses
                        .into_iter()
                        .flat_map(|p| split_response(client_id, p.packet_type, &p.payload))
                        .collect(),
                    Err(ProtocolError::PacketTimeout) => {
                        warn!(peer = %peer, client_id, console_id, "Console did not answer in time");
                        continue;
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "Console unavailable, closing session");
                        return;
                    }
                }
            }
        };

        for packet in packets {
            if let Err(e) = sink.send(packet).await {
                debug!(peer = %peer, error = %e, "Write failed");
                return;
            }
        }
    }
}
