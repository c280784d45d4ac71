//! Driving virtual parts: controls (buttons, pots) and touchscreens.

use serde::Serialize;
use serde_json::json;

use crate::client::WokwiClient;
use crate::error::{ClientError, Result};

/// Kind of touch interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchKind {
    Press,
    Move,
    Release,
}

/// A `touch:event` in touch-controller coordinates.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchEvent {
    pub part: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "event")]
    pub kind: TouchKind,
    /// Auto-release after this many nanoseconds; presses only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_after: Option<u64>,
}

impl TouchEvent {
    #[must_use]
    pub fn new(part: impl Into<String>, x: f64, y: f64, kind: TouchKind) -> Self {
        Self { part: part.into(), x, y, kind, release_after: None }
    }

    #[must_use]
    pub fn press(part: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(part, x, y, TouchKind::Press)
    }

    #[must_use]
    pub fn move_to(part: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(part, x, y, TouchKind::Move)
    }

    #[must_use]
    pub fn release(part: impl Into<String>, x: f64, y: f64) -> Self {
        Self::new(part, x, y, TouchKind::Release)
    }

    #[must_use]
    pub fn with_release_after(mut self, nanos: u64) -> Self {
        self.release_after = Some(nanos);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.part.trim().is_empty() {
            return Err(ClientError::Validation("touch event needs a part".into()));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ClientError::Validation("touch coordinates must be finite".into()));
        }
        if self.release_after.is_some() && self.kind != TouchKind::Press {
            return Err(ClientError::Validation("release_after only applies to press events".into()));
        }
        Ok(())
    }
}

impl WokwiClient {
    /// Set `control` on `part`, e.g. `("btn1", "pressed", 1.0)`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for a non-finite value, otherwise any call error.
    pub async fn set_control(&self, part: &str, control: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(ClientError::Validation(format!("control value must be finite: {value}")));
        }
        self.call("control:set", json!({ "part": part, "control": control, "value": value })).await.map(drop)
    }

    /// Send a touch interaction to a part with a touchscreen.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for a malformed event, otherwise any call error.
    pub async fn touch_event(&self, event: &TouchEvent) -> Result<()> {
        event.validate()?;
        let params = serde_json::to_value(event).map_err(|e| ClientError::Validation(e.to_string()))?;
        self.call("touch:event", params).await.map(drop)
    }
}

#[cfg(test)]
#[path = "parts_test.rs"]
mod tests;
