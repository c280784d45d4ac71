//! Request/response correlation over a single websocket.
//!
//! ARCHITECTURE
//! ============
//! One spawned task owns the socket and the pending-request table. Callers
//! never touch either: [`Correlator::call`] pushes an `Outbound::Call` onto an
//! unbounded channel and parks on a oneshot. The task `select!`s between that
//! channel and the socket:
//!
//! - outbound call → record the reply handle under its id, write the frame
//! - `response` frame → remove the handle for its id and resolve it
//! - `event` frame → mirror sim time, fan out to listener queues
//! - `error` frame → fail everything pending, close
//! - socket end / close → fail everything pending with `Disconnected`
//!
//! Ids are a monotonically increasing counter, so an id is never reused while
//! a response is outstanding. Dropping a call future sends `Outbound::Forget`
//! so its table entry goes away even if the server never answers.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::{Command, Event, Frame, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{self, EventQueue, ListenerRegistry, SIM_PAUSE_EVENT};
use crate::transport::command_message;

type PendingTx = oneshot::Sender<Result<Response>>;

enum Outbound {
    Call { command: Command, reply: PendingTx },
    Forget(String),
    Close,
}

// =============================================================================
// SIMULATION MIRROR
// =============================================================================

/// Local view of the remote simulation, built only from pushed events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SimulationStatus {
    /// Simulation time of the most recent event, in nanoseconds.
    pub nanos: u64,
    /// Paused flag of the most recent event.
    pub paused: bool,
    /// Simulation time of the most recent `sim:pause` event.
    pub last_pause_nanos: u64,
}

#[derive(Default)]
struct SimulationMirror {
    status: Mutex<SimulationStatus>,
}

impl SimulationMirror {
    fn observe(&self, event: &Event) {
        let nanos = nanos_from_wire(event.nanos);
        let mut status = events::lock(&self.status);
        status.nanos = nanos;
        status.paused = event.paused;
        if event.event == SIM_PAUSE_EVENT {
            status.paused = true;
            status.last_pause_nanos = nanos;
        }
    }

    fn snapshot(&self) -> SimulationStatus {
        *events::lock(&self.status)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn nanos_from_wire(nanos: f64) -> u64 {
    if nanos.is_finite() && nanos > 0.0 { nanos as u64 } else { 0 }
}

// =============================================================================
// CORRELATOR
// =============================================================================

/// Handle to a running connection task.
pub(crate) struct Correlator {
    tx: mpsc::UnboundedSender<Outbound>,
    next_id: AtomicU64,
    listeners: Arc<ListenerRegistry>,
    pending: Arc<AtomicUsize>,
    closed: watch::Receiver<bool>,
    sim: Arc<SimulationMirror>,
    event_capacity: usize,
    request_timeout: Option<Duration>,
}

impl Correlator {
    /// Take ownership of an established websocket and start the dispatch task.
    pub(crate) fn spawn<S>(stream: S, config: &ClientConfig) -> (Self, JoinHandle<()>)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let listeners = ListenerRegistry::new();
        let pending = Arc::new(AtomicUsize::new(0));
        let sim = Arc::new(SimulationMirror::default());

        let task = tokio::spawn(run_dispatch(
            stream,
            rx,
            Arc::clone(&listeners),
            Arc::clone(&pending),
            Arc::clone(&sim),
            closed_tx,
        ));

        let correlator = Self {
            tx,
            next_id: AtomicU64::new(1),
            listeners,
            pending,
            closed: closed_rx,
            sim,
            event_capacity: config.event_queue_capacity,
            request_timeout: config.request_timeout,
        };
        (correlator, task)
    }

    /// Send `command` and wait for its response.
    ///
    /// Error responses become [`ClientError::Server`]; losing the connection
    /// first becomes [`ClientError::Disconnected`].
    pub(crate) async fn call(&self, command: &str, params: Value) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Outbound::Call { command: Command::new(id.clone(), command, params), reply: reply_tx })
            .map_err(|_| ClientError::Disconnected)?;

        let mut guard = PendingGuard { id: Some(id), tx: &self.tx };
        let outcome = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx).await.map_err(|_| ClientError::Timeout(limit))?,
            None => reply_rx.await,
        };
        guard.disarm();

        let response = outcome.map_err(|_| ClientError::Disconnected)??;
        if let Some(err) = response.error_result() {
            return Err(ClientError::Server { code: err.code, message: err.message });
        }
        Ok(response)
    }

    /// Register a queue for push events named `event`.
    pub(crate) fn subscribe(&self, event: &str) -> EventQueue {
        self.listeners.subscribe(event, self.event_capacity)
    }

    /// Ask the task to send a close frame and shut down. Queued calls are
    /// written first.
    pub(crate) fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the dispatch task has torn the connection down.
    pub(crate) async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|is_closed| *is_closed).await;
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn simulation_status(&self) -> SimulationStatus {
        self.sim.snapshot()
    }
}

/// Removes a call's table entry if the call is dropped before it resolves.
struct PendingGuard<'a> {
    id: Option<String>,
    tx: &'a mpsc::UnboundedSender<Outbound>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let _ = self.tx.send(Outbound::Forget(id));
        }
    }
}

// =============================================================================
// DISPATCH TASK
// =============================================================================

/// Connection-task state. Dropping it fails every pending call, closes the
/// listener queues and flags the connection closed, so teardown also runs
/// when the task is aborted mid-write.
struct DispatchState {
    pending: HashMap<String, PendingTx>,
    listeners: Arc<ListenerRegistry>,
    gauge: Arc<AtomicUsize>,
    closed_tx: watch::Sender<bool>,
    reason: &'static str,
}

impl Drop for DispatchState {
    fn drop(&mut self) {
        let failed = self.pending.len();
        for (_, reply) in self.pending.drain() {
            let _ = reply.send(Err(ClientError::Disconnected));
        }
        self.gauge.store(0, Ordering::Relaxed);
        self.listeners.close_all();
        self.closed_tx.send_replace(true);
        info!(reason = self.reason, failed, "wokwi: connection closed");
    }
}

async fn run_dispatch<S>(
    stream: S,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    listeners: Arc<ListenerRegistry>,
    gauge: Arc<AtomicUsize>,
    sim: Arc<SimulationMirror>,
    closed_tx: watch::Sender<bool>,
) where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let mut state = DispatchState { pending: HashMap::new(), listeners, gauge, closed_tx, reason: "aborted" };

    state.reason = loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Call { command, reply }) => {
                    let id = command.id.clone();
                    debug!(%id, command = %command.command, "wokwi: send command");
                    state.pending.insert(id.clone(), reply);
                    state.gauge.store(state.pending.len(), Ordering::Relaxed);
                    if let Err(e) = sink.send(command_message(command)).await {
                        warn!(%id, error = %e, "wokwi: send failed");
                        if let Some(reply) = state.pending.remove(&id) {
                            let _ = reply.send(Err(ClientError::connection(e)));
                        }
                        break "send failed";
                    }
                }
                Some(Outbound::Forget(id)) => {
                    if state.pending.remove(&id).is_some() {
                        debug!(%id, "wokwi: pending request cancelled");
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break "closed by client";
                }
            },
            message = source.next() => {
                let Some(message) = message else { break "stream ended" };
                match message {
                    Ok(Message::Text(text)) => {
                        let flow = handle_text(text.as_str(), &mut state.pending, &state.listeners, &sim);
                        if let ControlFlow::Break(reason) = flow {
                            break reason;
                        }
                    }
                    Ok(Message::Binary(_)) => warn!("wokwi: unexpected binary frame skipped"),
                    Ok(Message::Close(_)) => break "closed by server",
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "wokwi: receive failed");
                        break "receive failed";
                    }
                }
            }
        }
        state.gauge.store(state.pending.len(), Ordering::Relaxed);
    };
}

fn handle_text(
    text: &str,
    pending: &mut HashMap<String, PendingTx>,
    listeners: &ListenerRegistry,
    sim: &SimulationMirror,
) -> ControlFlow<&'static str> {
    match protocol::decode_frame(text) {
        Ok(Frame::Response(response)) => match pending.remove(&response.id) {
            Some(reply) => {
                debug!(id = %response.id, command = %response.command, error = response.error, "wokwi: response");
                let _ = reply.send(Ok(response));
            }
            None => debug!(id = %response.id, "wokwi: response for unknown request ignored"),
        },
        Ok(Frame::Event(event)) => {
            sim.observe(&event);
            let delivered = listeners.dispatch(&event);
            debug!(event = %event.event, delivered, "wokwi: event");
        }
        Ok(Frame::Error(fault)) => {
            error!(message = %fault.message, "wokwi: server reported a fatal error");
            for (_, reply) in pending.drain() {
                let _ = reply.send(Err(ClientError::Server { code: -1, message: fault.message.clone() }));
            }
            return ControlFlow::Break("server error");
        }
        Ok(frame @ (Frame::Hello(_) | Frame::Command(_))) => {
            warn!(frame_type = frame.frame_type().as_str(), "wokwi: unexpected frame skipped");
        }
        Err(e) => warn!(error = %e, "wokwi: undecodable frame skipped"),
    }
    ControlFlow::Continue(())
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;
