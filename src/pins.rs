//! Pin inspection: `pin:read`, `pin:listen`, `gpio:list`.

use serde_json::{Value, json};

use crate::client::WokwiClient;
use crate::error::Result;
use crate::events::{EventQueue, PIN_CHANGE_EVENT};

impl WokwiClient {
    /// Current state of `pin` on `part` (e.g. `"esp"`, `"D2"`).
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn read_pin(&self, part: &str, pin: &str) -> Result<Value> {
        Ok(self.call("pin:read", json!({ "part": part, "pin": pin })).await?.result)
    }

    /// Start or stop `pin:change` events for `pin` on `part`.
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn listen_pin(&self, part: &str, pin: &str, listen: bool) -> Result<()> {
        self.call("pin:listen", json!({ "part": part, "pin": pin, "listen": listen })).await.map(drop)
    }

    /// Queue of `pin:change` events for every listened pin.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`](crate::ClientError::NotConnected) without a session.
    pub fn pin_changes(&self) -> Result<EventQueue> {
        self.subscribe(PIN_CHANGE_EVENT)
    }

    /// Every GPIO pin and its current state.
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn gpio_list(&self) -> Result<Value> {
        Ok(self.call("gpio:list", json!({})).await?.result)
    }
}

#[cfg(test)]
#[path = "pins_test.rs"]
mod tests;
