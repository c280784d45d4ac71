//! Typed client for the Wokwi simulation API.
//!
//! Connects to the simulator over a websocket, uploads firmware and diagrams,
//! drives the simulation and streams its serial output and pin changes.
//!
//! ```no_run
//! use wokwi_client::{StartOptions, WokwiClient};
//!
//! # async fn run() -> wokwi_client::Result<()> {
//! let client = WokwiClient::from_env()?;
//! client.connect().await?;
//! client.upload_file("diagram.json", None).await?;
//! client.upload_file("firmware.bin", None).await?;
//! client.start_simulation(&StartOptions::new("firmware.bin")).await?;
//! client.wait_until_simulation_time(10.0).await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`WokwiClientSync`] offers the same operations as blocking calls.

mod blocking;
mod client;
mod config;
mod correlator;
mod error;
mod events;
mod files;
mod framebuffer;
pub mod idf;
mod parts;
mod pins;
mod serial;
mod simulation;
mod transport;
mod vcd;

#[cfg(test)]
mod test_support;

pub use blocking::{SyncEventQueue, WokwiClientSync};
pub use client::{ConnectionState, WokwiClient};
pub use config::{ClientConfig, DEFAULT_WS_URL, GET_TOKEN_URL, SERVER_ENV, TOKEN_ENV, VERSION};
pub use correlator::SimulationStatus;
pub use error::{ClientError, Result};
pub use events::{EventQueue, PIN_CHANGE_EVENT, SERIAL_DATA_EVENT, SIM_PAUSE_EVENT};
pub use parts::{TouchEvent, TouchKind};
pub use protocol::{Event, Hello, Response};
pub use serial::SerialMonitor;
pub use simulation::StartOptions;
pub use vcd::VcdData;
