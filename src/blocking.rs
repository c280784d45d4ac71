//! Blocking facade.
//!
//! ARCHITECTURE
//! ============
//! `WokwiClientSync` owns a current-thread tokio runtime driven by one
//! background thread (`wokwi-sync-loop`). Each method spawns the matching
//! [`WokwiClient`] future onto that runtime and blocks the caller on a
//! channel until it completes, so both facades share one implementation and
//! one error taxonomy.
//!
//! Background serial monitors are plain tasks on the same runtime; they run
//! until `stop_serial_monitors()`, `disconnect()` or drop.
//!
//! Methods must not be called from inside an async context: they block the
//! calling thread. Calls made from the loop thread itself (for example inside
//! a `serial_monitor` callback) fail with `Validation` instead of deadlocking.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use protocol::{Event, Hello, Response};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{ConnectionState, WokwiClient};
use crate::config::ClientConfig;
use crate::correlator::SimulationStatus;
use crate::error::{ClientError, Result};
use crate::events::{self, EventQueue};
use crate::parts::TouchEvent;
use crate::simulation::StartOptions;
use crate::vcd::VcdData;

const LOOP_THREAD_NAME: &str = "wokwi-sync-loop";

struct EventLoop {
    stop: oneshot::Sender<()>,
    thread: thread::JoinHandle<()>,
}

/// Synchronous client for the Wokwi simulation API.
pub struct WokwiClientSync {
    client: Arc<WokwiClient>,
    handle: Handle,
    event_loop: Mutex<Option<EventLoop>>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl WokwiClientSync {
    /// Start the background event loop. Nothing is opened until
    /// [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// [`ClientError::Stdio`] if the runtime or its thread cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (stop, stopped) = oneshot::channel::<()>();
        let thread = thread::Builder::new().name(LOOP_THREAD_NAME.to_owned()).spawn(move || {
            runtime.block_on(async {
                let _ = stopped.await;
            });
            debug!("sync: event loop stopped");
        })?;

        Ok(Self {
            client: Arc::new(WokwiClient::new(config)),
            handle,
            event_loop: Mutex::new(Some(EventLoop { stop, thread })),
            monitors: Mutex::new(Vec::new()),
        })
    }

    /// # Errors
    ///
    /// [`ClientError::MissingToken`] when no token is set, or any error from [`new`](Self::new).
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Run `op` on the event loop and block until it finishes.
    fn run<T, F>(&self, op: impl FnOnce(Arc<WokwiClient>) -> F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if events::lock(&self.event_loop).is_none() {
            return Err(ClientError::NotConnected);
        }
        if on_loop_thread() {
            return Err(ClientError::Validation(format!(
                "blocking call made on the {LOOP_THREAD_NAME} thread would deadlock"
            )));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        let future = op(Arc::clone(&self.client));
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv().map_err(|_| ClientError::Disconnected)?
    }

    // =========================================================================
    // CONNECTION
    // =========================================================================

    /// # Errors
    ///
    /// See [`WokwiClient::connect`].
    pub fn connect(&self) -> Result<Hello> {
        self.run(|c| async move { c.connect().await })
    }

    /// Stop background monitors, close the connection and stop the event
    /// loop. Further calls fail with `NotConnected`; calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// See [`WokwiClient::disconnect`].
    pub fn disconnect(&self) -> Result<()> {
        if events::lock(&self.event_loop).is_none() {
            return Ok(());
        }
        self.stop_serial_monitors();
        let closed = self.run(|c| async move { c.disconnect().await });

        if let Some(event_loop) = events::lock(&self.event_loop).take() {
            let _ = event_loop.stop.send(());
            if event_loop.thread.join().is_err() {
                warn!("sync: event loop thread panicked");
            }
        }
        closed
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        self.client.version()
    }

    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        self.client.server_version()
    }

    #[must_use]
    pub fn last_pause_nanos(&self) -> u64 {
        self.client.last_pause_nanos()
    }

    #[must_use]
    pub fn simulation_status(&self) -> SimulationStatus {
        self.client.simulation_status()
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.client.pending_requests()
    }

    /// # Errors
    ///
    /// See [`WokwiClient::call`].
    pub fn call(&self, command: &str, params: Value) -> Result<Response> {
        let command = command.to_owned();
        self.run(move |c| async move { c.call(&command, params).await })
    }

    /// Subscribe to push events named `event`.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a session.
    pub fn subscribe(&self, event: &str) -> Result<SyncEventQueue> {
        let queue = self.client.subscribe(event)?;
        Ok(SyncEventQueue { queue, handle: self.handle.clone() })
    }

    // =========================================================================
    // FILES
    // =========================================================================

    /// # Errors
    ///
    /// See [`WokwiClient::upload`].
    pub fn upload(&self, name: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        let (name, content) = (name.to_owned(), content.into());
        self.run(move |c| async move { c.upload(&name, &content).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::upload_file`].
    pub fn upload_file(&self, name: &str, local_path: Option<&Path>) -> Result<String> {
        let (name, local_path) = (name.to_owned(), local_path.map(Path::to_path_buf));
        self.run(move |c| async move { c.upload_file(&name, local_path.as_deref()).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::download`].
    pub fn download(&self, name: &str) -> Result<Vec<u8>> {
        let name = name.to_owned();
        self.run(move |c| async move { c.download(&name).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::download_file`].
    pub fn download_file(&self, name: &str, path: &Path) -> Result<()> {
        let (name, path) = (name.to_owned(), path.to_path_buf());
        self.run(move |c| async move { c.download_file(&name, &path).await })
    }

    // =========================================================================
    // SIMULATION
    // =========================================================================

    /// # Errors
    ///
    /// See [`WokwiClient::start_simulation`].
    pub fn start_simulation(&self, options: &StartOptions) -> Result<()> {
        let options = options.clone();
        self.run(move |c| async move { c.start_simulation(&options).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::pause_simulation`].
    pub fn pause_simulation(&self) -> Result<()> {
        self.run(|c| async move { c.pause_simulation().await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::resume_simulation`].
    pub fn resume_simulation(&self, pause_after_nanos: Option<u64>) -> Result<()> {
        self.run(move |c| async move { c.resume_simulation(pause_after_nanos).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::restart_simulation`].
    pub fn restart_simulation(&self, pause: bool) -> Result<()> {
        self.run(move |c| async move { c.restart_simulation(pause).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::wait_until_simulation_time`].
    pub fn wait_until_simulation_time(&self, seconds: f64) -> Result<()> {
        self.run(move |c| async move { c.wait_until_simulation_time(seconds).await })
    }

    // =========================================================================
    // SERIAL
    // =========================================================================

    /// Deliver serial output to `on_chunk` from the event loop thread until
    /// the connection closes or monitors are stopped.
    ///
    /// `on_chunk` runs on the loop thread, so it must not block. Client
    /// methods called from it return [`ClientError::Validation`].
    ///
    /// # Errors
    ///
    /// See [`WokwiClient::serial_monitor`].
    pub fn serial_monitor(&self, mut on_chunk: impl FnMut(&[u8]) + Send + 'static) -> Result<()> {
        let mut monitor = self.run(|c| async move { c.serial_monitor().await })?;
        let task = self.handle.spawn(async move {
            while let Some(chunk) = monitor.next_chunk().await {
                on_chunk(&chunk);
            }
            debug!("sync: serial monitor ended");
        });
        events::lock(&self.monitors).push(task);
        Ok(())
    }

    /// Copy serial output to stdout in the background. Invalid UTF-8 is replaced.
    ///
    /// # Errors
    ///
    /// See [`WokwiClient::serial_monitor`].
    pub fn serial_monitor_cat(&self) -> Result<()> {
        self.serial_monitor(|chunk| {
            let mut stdout = std::io::stdout().lock();
            let written = stdout
                .write_all(String::from_utf8_lossy(chunk).as_bytes())
                .and_then(|()| stdout.flush());
            if let Err(e) = written {
                warn!(error = %e, "sync: failed to write serial output");
            }
        })
    }

    /// Abort every background serial monitor.
    pub fn stop_serial_monitors(&self) {
        let monitors = std::mem::take(&mut *events::lock(&self.monitors));
        for task in &monitors {
            task.abort();
        }
        if !monitors.is_empty() {
            debug!(count = monitors.len(), "sync: serial monitors stopped");
        }
    }

    /// # Errors
    ///
    /// See [`WokwiClient::serial_write`].
    pub fn serial_write(&self, data: impl Into<Vec<u8>>) -> Result<()> {
        let data = data.into();
        self.run(move |c| async move { c.serial_write(&data).await })
    }

    // =========================================================================
    // PINS AND PARTS
    // =========================================================================

    /// # Errors
    ///
    /// See [`WokwiClient::read_pin`].
    pub fn read_pin(&self, part: &str, pin: &str) -> Result<Value> {
        let (part, pin) = (part.to_owned(), pin.to_owned());
        self.run(move |c| async move { c.read_pin(&part, &pin).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::listen_pin`].
    pub fn listen_pin(&self, part: &str, pin: &str, listen: bool) -> Result<()> {
        let (part, pin) = (part.to_owned(), pin.to_owned());
        self.run(move |c| async move { c.listen_pin(&part, &pin, listen).await })
    }

    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a session.
    pub fn pin_changes(&self) -> Result<SyncEventQueue> {
        let queue = self.client.pin_changes()?;
        Ok(SyncEventQueue { queue, handle: self.handle.clone() })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::gpio_list`].
    pub fn gpio_list(&self) -> Result<Value> {
        self.run(|c| async move { c.gpio_list().await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::set_control`].
    pub fn set_control(&self, part: &str, control: &str, value: f64) -> Result<()> {
        let (part, control) = (part.to_owned(), control.to_owned());
        self.run(move |c| async move { c.set_control(&part, &control, value).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::touch_event`].
    pub fn touch_event(&self, event: &TouchEvent) -> Result<()> {
        let event = event.clone();
        self.run(move |c| async move { c.touch_event(&event).await })
    }

    // =========================================================================
    // CAPTURE
    // =========================================================================

    /// # Errors
    ///
    /// See [`WokwiClient::framebuffer_read`].
    pub fn framebuffer_read(&self, id: &str) -> Result<Response> {
        let id = id.to_owned();
        self.run(move |c| async move { c.framebuffer_read(&id).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::framebuffer_png_bytes`].
    pub fn framebuffer_png_bytes(&self, id: &str) -> Result<Vec<u8>> {
        let id = id.to_owned();
        self.run(move |c| async move { c.framebuffer_png_bytes(&id).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::save_framebuffer_png`].
    pub fn save_framebuffer_png(&self, id: &str, path: &Path, overwrite: bool) -> Result<PathBuf> {
        let (id, path) = (id.to_owned(), path.to_path_buf());
        self.run(move |c| async move { c.save_framebuffer_png(&id, &path, overwrite).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::compare_framebuffer_png`].
    pub fn compare_framebuffer_png(&self, id: &str, reference: &Path, save_mismatch: Option<&Path>) -> Result<bool> {
        let (id, reference, save_mismatch) = (id.to_owned(), reference.to_path_buf(), save_mismatch.map(Path::to_path_buf));
        self.run(move |c| async move { c.compare_framebuffer_png(&id, &reference, save_mismatch.as_deref()).await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::read_vcd`].
    pub fn read_vcd(&self) -> Result<VcdData> {
        self.run(|c| async move { c.read_vcd().await })
    }

    /// # Errors
    ///
    /// See [`WokwiClient::save_vcd`].
    pub fn save_vcd(&self, path: &Path, overwrite: bool) -> Result<VcdData> {
        let path = path.to_path_buf();
        self.run(move |c| async move { c.save_vcd(&path, overwrite).await })
    }
}

fn on_loop_thread() -> bool {
    thread::current().name() == Some(LOOP_THREAD_NAME)
}

impl Drop for WokwiClientSync {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!(error = %e, "sync: disconnect on drop failed");
        }
    }
}

impl std::fmt::Debug for WokwiClientSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WokwiClientSync").field("client", &self.client).finish_non_exhaustive()
    }
}

// =============================================================================
// BLOCKING EVENT QUEUE
// =============================================================================

/// Blocking view of an [`EventQueue`].
#[derive(Debug)]
pub struct SyncEventQueue {
    queue: EventQueue,
    handle: Handle,
}

impl SyncEventQueue {
    /// Block until the next event; `None` once the connection has closed and
    /// the queue is drained.
    ///
    /// On the loop thread this cannot block and behaves like
    /// [`try_recv`](Self::try_recv).
    pub fn recv(&mut self) -> Option<Event> {
        if on_loop_thread() {
            warn!("sync: recv on the event loop thread, not waiting");
            return self.queue.try_recv();
        }
        self.handle.block_on(self.queue.recv())
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Event> {
        // The timer needs a live runtime; a closed queue never waits.
        if let Some(event) = self.queue.try_recv() {
            return Some(event);
        }
        if self.queue.is_closed() || on_loop_thread() {
            return None;
        }
        self.handle.block_on(async { tokio::time::timeout(timeout, self.queue.recv()).await.ok().flatten() })
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.queue.try_recv()
    }

    pub fn flush(&mut self) -> usize {
        self.queue.flush()
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

#[cfg(test)]
#[path = "blocking_test.rs"]
mod tests;
