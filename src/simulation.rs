//! Simulation lifecycle: start, pause, resume, restart, run-until.

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::client::WokwiClient;
use crate::error::{ClientError, Result};

/// Parameters for `sim:start`.
///
/// Files named here must already be uploaded. Each custom chip `name` needs
/// `name.chip.json` and `name.chip.bin` uploaded as well.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StartOptions {
    pub firmware: String,
    pub elf: Option<String>,
    pub pause: bool,
    pub chips: Vec<String>,
}

impl StartOptions {
    #[must_use]
    pub fn new(firmware: impl Into<String>) -> Self {
        Self { firmware: firmware.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_elf(mut self, elf: impl Into<String>) -> Self {
        self.elf = Some(elf.into());
        self
    }

    /// Start with the simulation paused.
    #[must_use]
    pub fn paused(mut self) -> Self {
        self.pause = true;
        self
    }

    #[must_use]
    pub fn with_chip(mut self, chip: impl Into<String>) -> Self {
        self.chips.push(chip.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.firmware.trim().is_empty() {
            return Err(ClientError::Validation("firmware name must not be empty".into()));
        }
        if self.chips.iter().any(|chip| chip.trim().is_empty()) {
            return Err(ClientError::Validation("chip names must not be empty".into()));
        }
        Ok(())
    }
}

/// Seconds of simulated time as nanoseconds.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_to_nanos(seconds: f64) -> u64 {
    (seconds * 1e9).round() as u64
}

impl WokwiClient {
    /// Start a new simulation.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty firmware name, otherwise any
    /// call error.
    pub async fn start_simulation(&self, options: &StartOptions) -> Result<()> {
        options.validate()?;
        let params = serde_json::to_value(options).map_err(|e| ClientError::Validation(e.to_string()))?;
        self.call("sim:start", params).await?;
        info!(firmware = %options.firmware, paused = options.pause, "wokwi: simulation started");
        Ok(())
    }

    /// # Errors
    ///
    /// Any call error.
    pub async fn pause_simulation(&self) -> Result<()> {
        self.call("sim:pause", json!({})).await.map(drop)
    }

    /// Resume, optionally pausing again after `pause_after_nanos` of
    /// simulated time.
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn resume_simulation(&self, pause_after_nanos: Option<u64>) -> Result<()> {
        self.call("sim:resume", json!({ "pauseAfter": pause_after_nanos })).await.map(drop)
    }

    /// # Errors
    ///
    /// Any call error.
    pub async fn restart_simulation(&self, pause: bool) -> Result<()> {
        self.call("sim:restart", json!({ "pause": pause })).await.map(drop)
    }

    /// Run the simulation until `seconds` of simulated time have elapsed,
    /// then leave it paused.
    ///
    /// Returns immediately (after pausing) if that time has already passed.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for a negative or non-finite time,
    /// [`ClientError::Disconnected`] if the connection drops while waiting.
    pub async fn wait_until_simulation_time(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClientError::Validation(format!("invalid simulation time: {seconds}")));
        }
        let session = self.session()?;
        let target = seconds_to_nanos(seconds);

        self.pause_simulation().await?;
        let mut pauses = session.pause_events.lock().await;
        loop {
            let reached = session.correlator.simulation_status().last_pause_nanos;
            let remaining = target.saturating_sub(reached);
            if remaining == 0 {
                debug!(target, reached, "wokwi: simulation time reached");
                return Ok(());
            }
            pauses.flush();
            self.resume_simulation(Some(remaining)).await?;
            let event = pauses.recv().await.ok_or(ClientError::Disconnected)?;
            debug!(nanos = event.nanos, target, "wokwi: simulation paused");
        }
    }
}

#[cfg(test)]
#[path = "simulation_test.rs"]
mod tests;
