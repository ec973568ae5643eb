use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use log::{debug, warn};

use crate::process::EventSink;
use crate::structs::event::{BufferId, Event};
use crate::structs::registry::SlotRegistry;
use crate::structs::slot::{DataType, EventSlot, ModuleId, SlotId};
use crate::utils::errors::{BufferError, RegistryError};
use crate::utils::event_ring::EventRing;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// Bounded blocking FIFO carrying events from demultiplexers to consumers.
///
/// Producers block in [`queue`](Self::queue) while the buffer is full and
/// consumers block in [`dequeue`](Self::dequeue) while it is empty. Both
/// return once [`close`](Self::close) is called, which is the only way to
/// release a blocked caller without complementary activity.
///
/// The buffer also owns the slot registry used to address event data.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
/// use daqmux::process::buffer::EventBuffer;
/// use daqmux::structs::slot::{DataType, ModuleId};
///
/// let buffer = Arc::new(EventBuffer::new(4));
/// let slot = buffer.register_slot(ModuleId(0), "adc0", DataType::UInt)?;
///
/// let producer = {
///     let buffer = Arc::clone(&buffer);
///     let slot = slot.clone();
///     thread::spawn(move || {
///         let mut ev = buffer.create_event();
///         ev.put(slot.id(), 42u32);
///         buffer.queue(ev)
///     })
/// };
///
/// let ev = buffer.dequeue().unwrap();
/// assert_eq!(ev.get(slot.id()).as_uint(), Some(42));
/// producer.join().unwrap()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct EventBuffer {
    id: BufferId,
    state: Mutex<BufferState>,
    not_empty: Condvar,
    not_full: Condvar,
    registry: RwLock<SlotRegistry>,
}

#[derive(Debug)]
struct BufferState {
    ring: EventRing,
    closed: bool,
}

impl EventBuffer {
    /// Creates a buffer holding at most `size` events (at least 1).
    pub fn new(size: usize) -> Self {
        Self {
            id: BufferId(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(BufferState {
                ring: EventRing::new(size),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            registry: RwLock::new(SlotRegistry::default()),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty event bound to this buffer.
    pub fn create_event(&self) -> Event {
        Event::for_buffer(self.id)
    }

    /// Hands `event` to the buffer, waiting for free space.
    ///
    /// Fails only when the buffer has been closed; the event is dropped.
    pub fn queue(&self, event: Event) -> Result<(), BufferError> {
        let mut event = event;
        let mut state = self.lock();

        loop {
            if state.closed {
                return Err(BufferError::Closed);
            }

            match state.ring.push(event) {
                Ok(()) => {
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                Err(rejected) => {
                    event = rejected;
                    state = self
                        .not_full
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Takes the oldest event, waiting until one is available.
    ///
    /// Returns `None` once the buffer is closed and drained.
    pub fn dequeue(&self) -> Option<Event> {
        let mut state = self.lock();

        loop {
            if let Some(event) = state.ring.pop() {
                drop(state);
                self.not_full.notify_one();
                return Some(event);
            }

            if state.closed {
                return None;
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Takes the oldest event without waiting.
    pub fn try_dequeue(&self) -> Option<Event> {
        let event = self.lock().ring.pop()?;
        self.not_full.notify_one();
        Some(event)
    }

    /// Closes the buffer and wakes every blocked producer and consumer.
    ///
    /// Events already queued can still be dequeued.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        debug!("Event buffer {} closed", self.id.0);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn empty(&self) -> bool {
        self.lock().ring.is_empty()
    }

    pub fn full(&self) -> bool {
        self.lock().ring.is_full()
    }

    pub fn size(&self) -> usize {
        self.lock().ring.capacity()
    }

    pub fn level(&self) -> usize {
        self.lock().ring.len()
    }

    /// Replaces the storage with an empty ring of capacity `size`.
    ///
    /// Events still resident are destroyed. Returns how many were lost.
    pub fn set_size(&self, size: usize) -> usize {
        let old = {
            let mut state = self.lock();
            std::mem::replace(&mut state.ring, EventRing::new(size))
        };
        self.not_full.notify_all();

        let discarded = old.len();
        if discarded > 0 {
            warn!(
                "Event buffer resized to {size}: discarded {discarded} unconsumed events"
            );
        }
        discarded
    }

    pub fn register_slot(
        &self,
        owner: ModuleId,
        name: impl Into<String>,
        data_type: DataType,
    ) -> Result<EventSlot, RegistryError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_slot(owner, name, data_type)
    }

    pub fn get_event_slot(&self, owner: ModuleId, name: &str) -> Option<EventSlot> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_event_slot(owner, name)
            .cloned()
    }

    pub fn get_event_slots(&self, owner: ModuleId) -> Option<Vec<EventSlot>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get_event_slots(owner)
            .map(<[EventSlot]>::to_vec)
    }

    pub fn slot(&self, id: SlotId) -> Option<EventSlot> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .slot(id)
            .cloned()
    }

    pub fn destroy_event_slot(&self, id: SlotId) -> Result<EventSlot, RegistryError> {
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .destroy_event_slot(id)
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBuffer {
    fn create_event(&self) -> Event {
        EventBuffer::create_event(self)
    }

    fn publish(&self, event: Event) -> Result<(), BufferError> {
        self.queue(event)
    }
}
