//! Push-event listeners.
//!
//! DESIGN
//! ======
//! The correlator task hands every `event` frame to [`ListenerRegistry::dispatch`],
//! which appends it to the queue of each listener subscribed to that event name.
//! Queues are bounded: when one is full the oldest event is dropped and counted,
//! so a slow listener never stalls the receive path. Dispatch holds a std mutex
//! for the length of a few `VecDeque` pushes and never awaits.
//!
//! When the connection ends the registry is closed: pending events stay readable,
//! after which [`EventQueue::recv`] yields `None`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::Stream;
use protocol::Event;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Serial output chunk; payload `{ "bytes": [u8] }`.
pub const SERIAL_DATA_EVENT: &str = "serial-monitor:data";
/// Pin level change on a watched pin.
pub const PIN_CHANGE_EVENT: &str = "pin:change";
/// Simulation paused (after `pauseAfter` or an explicit pause).
pub const SIM_PAUSE_EVENT: &str = "sim:pause";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SLOT
// =============================================================================

/// One listener's queue. Shared between the registry and the [`EventQueue`].
struct Slot {
    id: u64,
    capacity: usize,
    queue: Mutex<VecDeque<Event>>,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl Slot {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Append an event, evicting the oldest one when full. Returns the
    /// total drop count if this push evicted something.
    fn push(&self, event: Event) -> Option<u64> {
        let mut evicted = None;
        {
            let mut queue = lock(&self.queue);
            if queue.len() >= self.capacity {
                queue.pop_front();
                evicted = Some(self.dropped.fetch_add(1, Ordering::Relaxed) + 1);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<Event> {
        lock(&self.queue).pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    closed: bool,
    listeners: HashMap<String, Vec<Arc<Slot>>>,
}

/// Event-name → listener queues for one connection.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ListenerRegistry {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener for `event`. A closed registry hands back an
    /// already-closed queue.
    pub(crate) fn subscribe(self: &Arc<Self>, event: &str, capacity: usize) -> EventQueue {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let slot = Arc::new(Slot::new(inner.next_id, capacity));
        if inner.closed {
            slot.close();
        } else {
            inner.listeners.entry(event.to_owned()).or_default().push(Arc::clone(&slot));
        }
        debug!(event, listener = slot.id, "events: listener added");
        EventQueue { event: event.to_owned(), slot, registry: Arc::downgrade(self) }
    }

    /// Queue `event` for every listener of its name. Returns how many
    /// listeners received it.
    pub(crate) fn dispatch(&self, event: &Event) -> usize {
        let inner = lock(&self.inner);
        let Some(slots) = inner.listeners.get(&event.event) else {
            return 0;
        };
        for slot in slots {
            if let Some(dropped) = slot.push(event.clone()) {
                if dropped == 1 {
                    warn!(event = %event.event, listener = slot.id, capacity = slot.capacity, "events: queue full, dropping oldest");
                } else {
                    debug!(event = %event.event, listener = slot.id, dropped, "events: dropped oldest");
                }
            }
        }
        slots.len()
    }

    /// Close every queue; later subscriptions start closed.
    pub(crate) fn close_all(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        for slot in inner.listeners.values().flatten() {
            slot.close();
        }
        inner.listeners.clear();
    }

    fn unsubscribe(&self, event: &str, id: u64) {
        let mut inner = lock(&self.inner);
        if let Some(slots) = inner.listeners.get_mut(event) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                inner.listeners.remove(event);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, event: &str) -> usize {
        lock(&self.inner).listeners.get(event).map_or(0, Vec::len)
    }
}

// =============================================================================
// EVENT QUEUE
// =============================================================================

/// A subscription to one push-event name.
///
/// Events arrive in the order the server sent them. Dropping the queue
/// unsubscribes it.
pub struct EventQueue {
    event: String,
    slot: Arc<Slot>,
    registry: Weak<ListenerRegistry>,
}

impl EventQueue {
    /// Event name this queue listens to.
    #[must_use]
    pub fn event_name(&self) -> &str {
        &self.event
    }

    /// Wait for the next event. Returns `None` once the connection has
    /// closed and every queued event has been read.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let notified = self.slot.notify.notified();
            if let Some(event) = self.slot.pop() {
                return Some(event);
            }
            if self.slot.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.slot.pop()
    }

    /// Discard every queued event and return how many there were.
    pub fn flush(&mut self) -> usize {
        let mut queue = lock(&self.slot.queue);
        let flushed = queue.len();
        queue.clear();
        flushed
    }

    /// Events evicted because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slot.queue).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the connection behind this queue has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }

    /// Adapt the queue into a [`Stream`] of events.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures_util::stream::unfold(self, |mut queue| async move {
            let event = queue.recv().await?;
            Some((event, queue))
        })
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("event", &self.event)
            .field("len", &self.len())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.event, self.slot.id);
        }
    }
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
