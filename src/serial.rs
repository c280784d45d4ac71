//! Serial monitor: byte-chunk stream from the simulated UART and writes to it.

use futures_util::Stream;
use protocol::Event;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::client::WokwiClient;
use crate::error::Result;
use crate::events::{EventQueue, SERIAL_DATA_EVENT};

/// Serial output of a running simulation, one chunk per `serial-monitor:data` event.
///
/// Ends when the connection closes. Dropping it stops local delivery; the
/// server keeps streaming until the connection closes.
#[derive(Debug)]
pub struct SerialMonitor {
    queue: EventQueue,
}

impl SerialMonitor {
    /// Wait for the next chunk of serial output.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        loop {
            let event = self.queue.recv().await?;
            match chunk_bytes(&event) {
                Some(bytes) => return Some(bytes),
                None => warn!(payload = %event.payload, "serial: malformed chunk skipped"),
            }
        }
    }

    /// Chunks evicted because the reader fell behind.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<u8>> + Send + 'static {
        futures_util::stream::unfold(self, |mut monitor| async move {
            let chunk = monitor.next_chunk().await?;
            Some((chunk, monitor))
        })
    }
}

fn chunk_bytes(event: &Event) -> Option<Vec<u8>> {
    let bytes = event.payload.get("bytes")?;
    serde_json::from_value::<Vec<u8>>(bytes.clone()).ok()
}

impl WokwiClient {
    /// Start listening to serial output.
    ///
    /// The listener is registered before `serial-monitor:listen` is sent, so
    /// no output produced after the request is missed.
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn serial_monitor(&self) -> Result<SerialMonitor> {
        let queue = self.subscribe(SERIAL_DATA_EVENT)?;
        self.call("serial-monitor:listen", json!({})).await?;
        debug!("serial: listening");
        Ok(SerialMonitor { queue })
    }

    /// Copy serial output to stdout until the connection closes. Invalid
    /// UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// Any call error, or [`ClientError::Stdio`](crate::ClientError::Stdio)
    /// if stdout cannot be written.
    pub async fn serial_monitor_cat(&self) -> Result<()> {
        let mut monitor = self.serial_monitor().await?;
        let mut stdout = tokio::io::stdout();
        while let Some(chunk) = monitor.next_chunk().await {
            stdout.write_all(String::from_utf8_lossy(&chunk).as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok(())
    }

    /// Send bytes to the simulated UART.
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn serial_write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let bytes = data.as_ref().iter().copied().map(Value::from).collect::<Vec<_>>();
        self.call("serial-monitor:write", json!({ "bytes": bytes })).await.map(drop)
    }
}

#[cfg(test)]
#[path = "serial_test.rs"]
mod tests;
