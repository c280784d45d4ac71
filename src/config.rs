//! Client configuration, loaded from the environment or built by hand.

use std::time::Duration;

use crate::error::{ClientError, Result};

/// Public simulator endpoint.
pub const DEFAULT_WS_URL: &str = "wss://wokwi.com/api/ws/beta";

/// Where users create a CI token.
pub const GET_TOKEN_URL: &str = "https://wokwi.com/dashboard/ci";

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "WOKWI_CLI_TOKEN";

/// Environment variable overriding the simulator endpoint.
pub const SERVER_ENV: &str = "WOKWI_CLI_SERVER";

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;

/// Library version, sent in the `User-Agent` header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runtime configuration for a client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API token sent as a bearer credential.
    pub token: String,
    /// Websocket endpoint of the simulator.
    pub server_url: String,
    /// Deadline for the websocket upgrade plus the `hello` handshake.
    pub connect_timeout: Duration,
    /// Per-request deadline. `None` waits until the response or disconnect.
    pub request_timeout: Option<Duration>,
    /// Bound on each push-event listener queue; the oldest event is dropped on overflow.
    pub event_queue_capacity: usize,
}

impl ClientConfig {
    /// Config for `token` against the public endpoint.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            server_url: DEFAULT_WS_URL.to_owned(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            request_timeout: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }

    /// Load config from `WOKWI_CLI_TOKEN` and `WOKWI_CLI_SERVER`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingToken`] when no token is set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config through an arbitrary variable lookup.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingToken`] when no token is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let token = get(TOKEN_ENV).ok_or(ClientError::MissingToken(GET_TOKEN_URL))?;
        let mut config = Self::new(token);
        if let Some(server) = get(SERVER_ENV) {
            config.server_url = server;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Capacity is clamped to at least one event.
    #[must_use]
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    /// `User-Agent` header value for the websocket upgrade.
    #[must_use]
    pub fn user_agent(&self) -> String {
        format!("wokwi-client-rs/{VERSION}")
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
