//! # Console Marker Protocol
//!
//! Drives a plain, line-oriented game-server console as if it understood
//! request ids.
//!
//! The console echoes the reason text of `ban-ip` back into its output. To
//! run a command with request id `I` and type `T` the worker writes:
//!
//! ```text
//! pardon-ip <marker>          <- its echo flushes unrelated console chatter
//! <payload>                   <- the user's command, if any
//! ban-ip <marker> I,T         <- its echo closes the reply and carries I,T
//! ```
//!
//! Line breaks inside the payload are flattened to spaces, so a request is
//! always exactly those lines.
//!
//! Output lines are stripped of their timestamp/log-level prefix and
//! collected until a marker line appears. A marker with `I,T` turns the
//! collected lines into one response; a bare marker (the pardon echo)
//! discards them. Nothing is collected while no request is in flight, and a
//! response stops growing at its byte limit.
//!
//! The console is one serial resource. [`ConsoleHandle`] feeds it through a
//! [`CorrelationQueue`] with a single slot, so submissions from every bridge
//! session run strictly one after another in arrival order.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, error, info, trace, warn};

use crate::config::DEFAULT_MAX_RESPONSE_BYTES;
use crate::core::packet::{ascii_lossy, response_type_for, unknown_request_payload, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::queue::{CorrelationQueue, ResponseTicket};

/// Per-line console prefix: one or more bracketed tags, e.g.
/// `[12:00:00] [Server thread/INFO]: ` or `[12:00:00 INFO] CONSOLE: `.
/// Brackets inside the message itself are left alone.
const PREFIX_PATTERN: &str = r"^(?:\[[^\]]*\] ?)+(?: CONSOLE)?:? (.+)$";

/// Separator used when joining collected output lines into one payload
const LINE_JOIN: &str = " ";

/// What a marker line carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Marker address without request fields (the `pardon-ip` echo)
    Bare,
    /// `ban-ip` echo carrying the request id and type
    Tagged { id: i32, request_type: i32 },
}

/// Rendering and parsing rules for one marker address.
#[derive(Debug, Clone)]
pub struct MarkerProtocol {
    marker_address: String,
    line_separator: String,
    prefix: Regex,
    marker: Regex,
}

impl MarkerProtocol {
    pub fn new(marker_address: &str, line_separator: &str) -> Result<Self> {
        if marker_address.is_empty() || marker_address.chars().any(char::is_whitespace) {
            return Err(ProtocolError::ConfigError(format!(
                "invalid marker address '{marker_address}'"
            )));
        }
        let prefix = Regex::new(PREFIX_PATTERN)
            .map_err(|e| ProtocolError::ConfigError(format!("prefix pattern: {e}")))?;
        let marker = Regex::new(&format!(
            r"(?i)ip {}:?(?: (-?\d{{1,10}}),(\d{{1,3}}))?",
            regex::escape(marker_address)
        ))
        .map_err(|e| ProtocolError::ConfigError(format!("marker pattern: {e}")))?;

        Ok(Self {
            marker_address: marker_address.to_string(),
            line_separator: line_separator.to_string(),
            prefix,
            marker,
        })
    }

    pub fn marker_address(&self) -> &str {
        &self.marker_address
    }

    /// Console input for one request: unban, payload, tagged ban.
    pub fn render(&self, id: i32, request_type: i32, payload: &str) -> String {
        let sep = &self.line_separator;
        let mut out = format!("pardon-ip {}{sep}", self.marker_address);
        let payload = self.single_line(payload);
        if !payload.is_empty() {
            out.push_str(&payload);
            out.push_str(sep);
        }
        out.push_str(&format!("ban-ip {} {id},{request_type}{sep}", self.marker_address));
        out
    }

    /// `payload` with the separator and any CR/LF replaced by spaces.
    pub fn single_line(&self, payload: &str) -> String {
        payload
            .replace(self.line_separator.as_str(), " ")
            .replace(['\r', '\n'], " ")
    }

    /// Console input that bans the marker once so the first unban succeeds.
    pub fn primer(&self) -> String {
        format!("ban-ip {}{}", self.marker_address, self.line_separator)
    }

    /// Text after the timestamp/log-level prefix; lines without one pass
    /// through unchanged.
    pub fn strip_prefix<'a>(&self, line: &'a str) -> &'a str {
        self.prefix
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map_or(line, |m| m.as_str())
    }

    pub fn parse_marker(&self, line: &str) -> Option<Marker> {
        let caps = self.marker.captures(line)?;
        let fields = caps
            .get(1)
            .zip(caps.get(2))
            .and_then(|(id, ty)| Some((id.as_str().parse().ok()?, ty.as_str().parse().ok()?)));
        Some(match fields {
            Some((id, request_type)) => Marker::Tagged { id, request_type },
            None => Marker::Bare,
        })
    }
}

/// Collects stripped output lines between markers.
///
/// Lines only accumulate while collecting is on and stop once the batch
/// holds `max_bytes`. Markers are recognised either way.
#[derive(Debug)]
pub struct ResponseAssembler {
    protocol: MarkerProtocol,
    lines: Vec<String>,
    bytes: usize,
    max_bytes: usize,
    dropped: usize,
    collecting: bool,
}

impl ResponseAssembler {
    pub fn new(protocol: MarkerProtocol) -> Self {
        Self::with_max_bytes(protocol, DEFAULT_MAX_RESPONSE_BYTES)
    }

    pub fn with_max_bytes(protocol: MarkerProtocol, max_bytes: usize) -> Self {
        Self {
            protocol,
            lines: Vec::new(),
            bytes: 0,
            max_bytes,
            dropped: 0,
            collecting: true,
        }
    }

    /// Lines collected since the last marker
    pub fn buffered(&self) -> usize {
        self.lines.len()
    }

    /// Bytes collected since the last marker, separators included
    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }

    /// Turn collection on or off. Turning it off drops the current batch.
    pub fn set_collecting(&mut self, collecting: bool) {
        if !collecting && !self.lines.is_empty() {
            trace!(discarded = self.lines.len(), "Discarding console output with nothing in flight");
            self.clear();
        }
        self.collecting = collecting;
    }

    /// Feed one raw console line. Returns the response once a tagged marker
    /// closes the batch.
    pub fn push_line(&mut self, raw: &str) -> Option<Packet> {
        let line = self.protocol.strip_prefix(raw);
        match self.protocol.parse_marker(line) {
            None => {
                self.collect(line);
                None
            }
            Some(Marker::Bare) => {
                if !self.lines.is_empty() {
                    trace!(discarded = self.lines.len(), "Discarding console output before marker");
                }
                self.clear();
                None
            }
            Some(Marker::Tagged { id, request_type }) => {
                if self.dropped > 0 {
                    warn!(id, dropped = self.dropped, limit = self.max_bytes, "Console response truncated");
                }
                let lines = std::mem::take(&mut self.lines);
                self.clear();
                let payload = if lines.is_empty() {
                    unknown_request_payload(request_type)
                } else {
                    ascii_lossy(&lines.join(LINE_JOIN))
                };
                Some(Packet {
                    id,
                    packet_type: response_type_for(request_type),
                    payload,
                })
            }
        }
    }

    fn collect(&mut self, line: &str) {
        if !self.collecting {
            return;
        }
        let cost = if self.lines.is_empty() {
            line.len()
        } else {
            line.len() + LINE_JOIN.len()
        };
        if self.bytes + cost > self.max_bytes {
            self.dropped += 1;
            return;
        }
        self.bytes += cost;
        self.lines.push(line.to_string());
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.bytes = 0;
        self.dropped = 0;
    }
}

/// The managed process's console: where commands go and where output comes
/// from.
#[derive(Debug)]
pub struct ManagedConsole<W, R> {
    input: W,
    output: R,
}

impl<W, R> ManagedConsole<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(input: W, output: R) -> Self {
        Self { input, output }
    }
}

impl ManagedConsole<ChildStdin, ChildStdout> {
    /// Take the piped stdin/stdout of a spawned child.
    ///
    /// The child must have been spawned with `Stdio::piped()` for both.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let input = child
            .stdin
            .take()
            .ok_or_else(|| ProtocolError::Custom("child stdin is not piped".into()))?;
        let output = child
            .stdout
            .take()
            .ok_or_else(|| ProtocolError::Custom("child stdout is not piped".into()))?;
        Ok(Self { input, output })
    }
}

/// Cheap handle to the running console worker.
#[derive(Debug, Clone)]
pub struct ConsoleHandle {
    queue: CorrelationQueue,
    timeout: Duration,
}

/// Background tasks owning the console streams
#[derive(Debug)]
pub struct ConsoleTasks {
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ConsoleTasks {
    pub fn abort(&self) {
        self.writer.abort();
        self.reader.abort();
    }
}

impl Drop for ConsoleTasks {
    fn drop(&mut self) {
        self.abort();
    }
}

impl ConsoleHandle {
    /// Start the worker tasks. When `prime` is set the primer line is written
    /// before any request. One response keeps at most `max_response_bytes`
    /// of console output.
    pub fn spawn<W, R>(
        console: ManagedConsole<W, R>,
        protocol: MarkerProtocol,
        timeout: Duration,
        prime: bool,
        max_response_bytes: usize,
    ) -> (Self, ConsoleTasks)
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (queue, outbound) = CorrelationQueue::channel(1);
        let writer = tokio::spawn(write_console(
            console.input,
            outbound,
            queue.clone(),
            protocol.clone(),
            prime,
        ));
        let reader = tokio::spawn(read_console(
            console.output,
            queue.clone(),
            ResponseAssembler::with_max_bytes(protocol, max_response_bytes),
        ));
        (Self { queue, timeout }, ConsoleTasks { writer, reader })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Queue a request for the console under a fresh console id.
    ///
    /// The returned ticket resolves to a single response packet carrying
    /// that console id.
    pub fn submit(&self, request_type: i32, payload: &str) -> Result<ResponseTicket> {
        self.queue.submit_with(|id| {
            Ok(vec![Packet {
                id,
                packet_type: request_type,
                payload: payload.to_string(),
            }])
        })
    }

    /// Run one request and wait for its output.
    pub async fn execute(&self, request_type: i32, payload: &str) -> Result<Packet> {
        let packets = self.submit(request_type, payload)?.wait(self.timeout).await?;
        packets
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::Custom("console reply was empty".into()))
    }
}

async fn write_console<W>(
    mut input: W,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    queue: CorrelationQueue,
    protocol: MarkerProtocol,
    prime: bool,
) where
    W: AsyncWrite + Unpin,
{
    if prime {
        if let Err(e) = write_text(&mut input, &protocol.primer()).await {
            error!(error = %e, "Could not prime console");
            queue.fail_all(constants::ERR_CONSOLE_CLOSED);
            return;
        }
        debug!(marker = protocol.marker_address(), "Console primed");
    }

    while let Some(request) = outbound.recv().await {
        let text = protocol.render(request.id, request.packet_type, &request.payload);
        trace!(id = request.id, "Writing console request");
        // All lines of one request go out in a single write.
        if let Err(e) = write_text(&mut input, &text).await {
            error!(error = %e, "Console input closed");
            queue.fail_all(constants::ERR_CONSOLE_CLOSED);
            return;
        }
    }
}

async fn write_text<W: AsyncWrite + Unpin>(input: &mut W, text: &str) -> std::io::Result<()> {
    input.write_all(text.as_bytes()).await?;
    input.flush().await
}

async fn read_console<R>(output: R, queue: CorrelationQueue, mut assembler: ResponseAssembler)
where
    R: AsyncRead + Unpin,
{
    let mut lines = FramedRead::new(output, AnyDelimiterCodec::new(b"\n".to_vec(), Vec::new()));

    while let Some(line) = lines.next().await {
        let line: Bytes = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Console output failed");
                break;
            }
        };
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches('\r');
        trace!(line = %text, "Console");

        assembler.set_collecting(queue.in_flight() > 0);
        if let Some(response) = assembler.push_line(text) {
            let id = response.id;
            if queue.deliver(response) {
                queue.complete(id);
            } else {
                debug!(id, "Console reply for a request that is no longer pending");
            }
        }
    }

    info!("Console output closed");
    queue.fail_all(constants::ERR_CONSOLE_CLOSED);
}
