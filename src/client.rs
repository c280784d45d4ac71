//! Async facade over one simulator connection.
//!
//! DESIGN
//! ======
//! `WokwiClient` is a thin shell around a [`Session`]: the correlator handle,
//! the server greeting and a standing `sim:pause` queue used by
//! `wait_until_simulation_time`. Every method takes `&self`, so independent
//! calls can be in flight concurrently from clones of an `Arc<WokwiClient>`.
//!
//! The remote operations live next to their payload types in sibling modules
//! (`simulation`, `files`, `serial`, `pins`, `parts`, `framebuffer`, `vcd`),
//! each adding an `impl WokwiClient` block on top of [`WokwiClient::call`].
//!
//! LIFECYCLE
//! =========
//! `Disconnected` → `connect()` → `Connecting` → `Connected` →
//! `disconnect()` or server close → `Closed`. A closed client can connect
//! again; calls made while no session exists fail with `NotConnected`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use protocol::{Hello, Response};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, VERSION};
use crate::correlator::{Correlator, SimulationStatus};
use crate::error::{ClientError, Result};
use crate::events::{self, EventQueue, SIM_PAUSE_EVENT};
use crate::transport;

/// Upper bound on waiting for the close handshake in `disconnect()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a client is in its connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done and the connection is open.
    Connected,
    /// Closed by `disconnect()` or by the server.
    Closed,
}

pub(crate) struct Session {
    pub(crate) correlator: Correlator,
    pub(crate) pause_events: tokio::sync::Mutex<EventQueue>,
    hello: Hello,
    task: JoinHandle<()>,
}

/// Asynchronous client for the Wokwi simulation API.
pub struct WokwiClient {
    config: ClientConfig,
    session: Mutex<Option<Arc<Session>>>,
    state: Mutex<ConnectionState>,
}

impl WokwiClient {
    /// Client for `config`. Nothing is opened until [`connect`](Self::connect).
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self { config, session: Mutex::new(None), state: Mutex::new(ConnectionState::Disconnected) }
    }

    /// Client configured from `WOKWI_CLI_TOKEN` / `WOKWI_CLI_SERVER`.
    ///
    /// # Errors
    ///
    /// [`ClientError::MissingToken`] when no token is set.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ClientConfig::from_env()?))
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Library version.
    #[must_use]
    pub fn version(&self) -> &'static str {
        VERSION
    }

    /// Version the server announced in its greeting, while connected.
    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.current().map(|session| session.hello.app_version.clone())
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let state = *events::lock(&self.state);
        match (state, self.current()) {
            (ConnectionState::Connected, Some(session)) if session.correlator.is_closed() => ConnectionState::Closed,
            (state, _) => state,
        }
    }

    /// Open the websocket and wait for the server greeting.
    ///
    /// Connecting an already connected client returns the existing greeting.
    ///
    /// # Errors
    ///
    /// [`ClientError::Connection`] or [`ClientError::Timeout`] if the socket
    /// cannot be opened, [`ClientError::Protocol`] for an unsupported greeting.
    pub async fn connect(&self) -> Result<Hello> {
        if let Some(session) = self.current().filter(|s| !s.correlator.is_closed()) {
            debug!("wokwi: already connected");
            return Ok(session.hello.clone());
        }

        let previous = std::mem::replace(&mut *events::lock(&self.state), ConnectionState::Connecting);
        let (stream, hello) = match transport::connect(&self.config).await {
            Ok(connected) => connected,
            Err(e) => {
                *events::lock(&self.state) = previous;
                warn!(url = %self.config.server_url, error = %e, "wokwi: connect failed");
                return Err(e);
            }
        };

        let (correlator, task) = Correlator::spawn(stream, &self.config);
        let pause_events = tokio::sync::Mutex::new(correlator.subscribe(SIM_PAUSE_EVENT));
        let session = Arc::new(Session { correlator, pause_events, hello: hello.clone(), task });

        *events::lock(&self.session) = Some(session);
        *events::lock(&self.state) = ConnectionState::Connected;
        Ok(hello)
    }

    /// Close the connection. Calling it again, or before `connect()`, is a no-op.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible so the blocking facade can forward it.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(session) = events::lock(&self.session).take() else {
            return Ok(());
        };

        session.correlator.close();
        if tokio::time::timeout(CLOSE_TIMEOUT, session.correlator.closed()).await.is_err() {
            warn!(timeout = ?CLOSE_TIMEOUT, "wokwi: close handshake timed out, aborting");
            session.task.abort();
            // Dropping the aborted task fails pending calls and closes listeners.
            session.correlator.closed().await;
        }
        *events::lock(&self.state) = ConnectionState::Closed;
        info!("wokwi: disconnected");
        Ok(())
    }

    /// Send a raw command and wait for its response.
    ///
    /// Typed helpers cover every documented command; this is the escape
    /// hatch for anything newer.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a session, otherwise whatever
    /// the correlator reports.
    pub async fn call(&self, command: &str, params: Value) -> Result<Response> {
        self.session()?.correlator.call(command, params).await
    }

    /// Subscribe to push events named `event`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a session.
    pub fn subscribe(&self, event: &str) -> Result<EventQueue> {
        Ok(self.session()?.correlator.subscribe(event))
    }

    /// Simulation time of the most recent `sim:pause` event, in nanoseconds.
    #[must_use]
    pub fn last_pause_nanos(&self) -> u64 {
        self.simulation_status().last_pause_nanos
    }

    /// Calls sent and still awaiting their response. Zero without a session.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.current().map_or(0, |s| s.correlator.pending_count())
    }

    #[must_use]
    pub fn simulation_status(&self) -> SimulationStatus {
        self.current().map(|s| s.correlator.simulation_status()).unwrap_or_default()
    }

    pub(crate) fn session(&self) -> Result<Arc<Session>> {
        self.current().ok_or(ClientError::NotConnected)
    }

    fn current(&self) -> Option<Arc<Session>> {
        events::lock(&self.session).clone()
    }
}

impl std::fmt::Debug for WokwiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WokwiClient")
            .field("server_url", &self.config.server_url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
