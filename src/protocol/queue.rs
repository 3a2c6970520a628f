//! # Correlation Queue
//!
//! Multiplexes concurrent request/response exchanges over one ordered
//! duplex channel.
//!
//! Every request is an explicit entry in a `id → PendingRequest` map. The
//! entry is inserted on [`CorrelationQueue::submit`] and removed exactly once:
//! on [`CorrelationQueue::complete`], on timeout, on [`CorrelationQueue::reject`],
//! or when the whole queue fails. A response for an id that is no longer in
//! the map is dropped, so a late reply can never resurrect a timed-out
//! request or reach the wrong caller.
//!
//! At most `max_in_flight` requests are on the wire at once. The rest wait in
//! FIFO order and are emitted onto the outbound channel as slots free up.
//!
//! ```text
//! submit ──► waiting (FIFO) ──admit──► outbound channel ──► peer
//!                                              │
//! ticket.wait ◄── complete(id) ◄── deliver(packet) ◄── peer
//! ```

use crate::core::packet::{random_id, Packet};
use crate::error::{constants, ProtocolError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Default number of requests allowed on the wire at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 2;

type Waiter = oneshot::Sender<Result<Vec<Packet>>>;

/// Ephemeral correlation record for one outstanding request
#[derive(Debug)]
struct PendingRequest {
    /// Distinguishes successive requests that reuse the same id
    serial: u64,
    /// Frames still waiting for admission; `None` once emitted
    frames: Option<Vec<Packet>>,
    submitted_at: Instant,
    /// Response packets collected so far, in arrival order
    responses: Vec<Packet>,
    waiter: Option<Waiter>,
}

impl PendingRequest {
    fn admitted(&self) -> bool {
        self.frames.is_none()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    in_flight: usize,
    waiting: VecDeque<i32>,
    pending: HashMap<i32, PendingRequest>,
    next_serial: u64,
    closed: Option<String>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    outbound: mpsc::UnboundedSender<Packet>,
    max_in_flight: usize,
}

/// Bounded-concurrency request dispatcher keyed by request id.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct CorrelationQueue {
    shared: Arc<Shared>,
}

impl CorrelationQueue {
    /// Create a queue that emits admitted frames onto `outbound`.
    ///
    /// A `max_in_flight` of zero is treated as one.
    pub fn new(outbound: mpsc::UnboundedSender<Packet>, max_in_flight: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                outbound,
                max_in_flight: max_in_flight.max(1),
            }),
        }
    }

    /// Create a queue together with the receiving end of its outbound channel
    pub fn channel(max_in_flight: usize) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, max_in_flight), rx)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the map half-updated in
        // a way that matters more than losing the queue entirely.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn max_in_flight(&self) -> usize {
        self.shared.max_in_flight
    }

    /// Number of requests currently on the wire
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Number of requests admitted or waiting
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of requests waiting for a free slot
    pub fn waiting_count(&self) -> usize {
        self.lock().waiting.len()
    }

    pub fn is_pending(&self, id: i32) -> bool {
        self.lock().pending.contains_key(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Random id that is not currently outstanding on this queue.
    pub fn allocate_id(&self) -> i32 {
        let state = self.lock();
        loop {
            let id = random_id();
            if !state.pending.contains_key(&id) {
                return id;
            }
            trace!(id, "Rejected colliding request id");
        }
    }

    /// Queue `frames` (all sharing `id`) for sending and register a waiter.
    ///
    /// The frames go out immediately when a slot is free, otherwise once an
    /// earlier request completes or times out.
    pub fn submit(&self, id: i32, frames: Vec<Packet>) -> Result<ResponseTicket> {
        let mut state = self.lock();
        if state.pending.contains_key(&id) {
            return Err(ProtocolError::DuplicateId(id));
        }
        self.insert(&mut state, id, frames)
    }

    /// Allocate a fresh id and submit the frames `build` makes for it, under
    /// one lock so no other submission can claim the id in between.
    pub fn submit_with<F>(&self, build: F) -> Result<ResponseTicket>
    where
        F: FnOnce(i32) -> Result<Vec<Packet>>,
    {
        let mut state = self.lock();
        let id = loop {
            let id = random_id();
            if !state.pending.contains_key(&id) {
                break id;
            }
        };
        let frames = build(id)?;
        self.insert(&mut state, id, frames)
    }

    fn insert(&self, state: &mut QueueState, id: i32, frames: Vec<Packet>) -> Result<ResponseTicket> {
        if let Some(reason) = &state.closed {
            return Err(ProtocolError::ConnectionError(reason.clone()));
        }

        let (tx, rx) = oneshot::channel();
        let submitted_at = Instant::now();
        let serial = state.next_serial;
        state.next_serial += 1;
        state.pending.insert(
            id,
            PendingRequest {
                serial,
                frames: Some(frames),
                submitted_at,
                responses: Vec::new(),
                waiter: Some(tx),
            },
        );
        state.waiting.push_back(id);
        self.admit_waiting(state);

        Ok(ResponseTicket {
            queue: self.clone(),
            id,
            serial,
            submitted_at,
            rx: Some(rx),
        })
    }

    /// Record a response packet for an admitted request.
    ///
    /// Returns `false` when nothing is waiting for that id (stale or unknown).
    pub fn deliver(&self, packet: Packet) -> bool {
        let mut state = self.lock();
        match state.pending.get_mut(&packet.id) {
            Some(entry) if entry.admitted() => {
                entry.responses.push(packet);
                true
            }
            _ => {
                debug!(id = packet.id, "Dropping response with no matching request");
                false
            }
        }
    }

    /// Finish the request `id`, handing its collected responses to the waiter
    /// and admitting the next waiting request.
    pub fn complete(&self, id: i32) -> bool {
        let mut state = self.lock();
        let admitted = matches!(state.pending.get(&id), Some(entry) if entry.admitted());
        if !admitted {
            debug!(id, "Completion for unknown or unsent request ignored");
            return false;
        }
        if let Some(mut entry) = self.remove(&mut state, id) {
            trace!(id, elapsed_ms = entry.submitted_at.elapsed().as_millis() as u64, "Request completed");
            if let Some(waiter) = entry.waiter.take() {
                let _ = waiter.send(Ok(std::mem::take(&mut entry.responses)));
            }
        }
        self.admit_waiting(&mut state);
        true
    }

    /// Fail the request `id` with `error`.
    pub fn reject(&self, id: i32, error: ProtocolError) -> bool {
        let mut state = self.lock();
        let Some(mut entry) = self.remove(&mut state, id) else {
            return false;
        };
        if let Some(waiter) = entry.waiter.take() {
            let _ = waiter.send(Err(error));
        }
        self.admit_waiting(&mut state);
        true
    }

    /// Fail every pending request with a connection error and refuse new ones.
    pub fn fail_all(&self, reason: &str) -> usize {
        let mut state = self.lock();
        if state.closed.is_none() {
            state.closed = Some(reason.to_string());
        }
        state.waiting.clear();
        state.in_flight = 0;

        let failed = state.pending.len();
        for (_, mut entry) in state.pending.drain() {
            if let Some(waiter) = entry.waiter.take() {
                let _ = waiter.send(Err(ProtocolError::ConnectionError(reason.to_string())));
            }
        }
        if failed > 0 {
            warn!(failed, reason, "Failed all pending requests");
        }
        failed
    }

    /// Drop the request if it is still the one identified by `serial`.
    fn forget(&self, id: i32, serial: u64) {
        let mut state = self.lock();
        if !matches!(state.pending.get(&id), Some(entry) if entry.serial == serial) {
            return;
        }
        self.remove(&mut state, id);
        self.admit_waiting(&mut state);
    }

    fn remove(&self, state: &mut QueueState, id: i32) -> Option<PendingRequest> {
        let entry = state.pending.remove(&id)?;
        if entry.admitted() {
            state.in_flight = state.in_flight.saturating_sub(1);
        } else {
            state.waiting.retain(|waiting| *waiting != id);
        }
        Some(entry)
    }

    fn admit_waiting(&self, state: &mut QueueState) {
        while state.in_flight < self.shared.max_in_flight {
            let Some(id) = state.waiting.pop_front() else {
                return;
            };
            let Some(frames) = state.pending.get_mut(&id).and_then(|e| e.frames.take()) else {
                continue;
            };

            state.in_flight += 1;
            for frame in frames {
                if self.shared.outbound.send(frame).is_err() {
                    let reason = constants::ERR_QUEUE_CLOSED.to_string();
                    if let Some(mut entry) = state.pending.remove(&id) {
                        if let Some(waiter) = entry.waiter.take() {
                            let _ = waiter.send(Err(ProtocolError::ConnectionError(reason)));
                        }
                    }
                    state.in_flight -= 1;
                    break;
                }
            }
        }
    }
}

/// Handle for awaiting the response to one submitted request.
///
/// Dropping the ticket (including after a timeout) removes the request from
/// the queue if it is still outstanding.
#[derive(Debug)]
pub struct ResponseTicket {
    queue: CorrelationQueue,
    id: i32,
    serial: u64,
    submitted_at: Instant,
    rx: Option<oneshot::Receiver<Result<Vec<Packet>>>>,
}

impl ResponseTicket {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Wait up to `timeout` for the correlated response packets.
    ///
    /// On expiry the request is purged and [`ProtocolError::PacketTimeout`]
    /// is returned.
    pub async fn wait(mut self, timeout: Duration) -> Result<Vec<Packet>> {
        let Some(rx) = self.rx.take() else {
            return Err(ProtocolError::InvalidState("ticket already awaited"));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ProtocolError::ConnectionError(
                constants::ERR_QUEUE_CLOSED.to_string(),
            )),
            Err(_) => {
                debug!(id = self.id, timeout_ms = timeout.as_millis() as u64, "Request timed out");
                Err(ProtocolError::PacketTimeout)
            }
        }
    }
}

impl Drop for ResponseTicket {
    fn drop(&mut self) {
        self.queue.forget(self.id, self.serial);
    }
}
