use std::collections::VecDeque;

use crate::structs::event::Event;

/// Fixed-capacity FIFO storage for queued events.
///
/// Not synchronised on its own; [`EventBuffer`](crate::process::buffer::EventBuffer)
/// keeps it behind a mutex.
#[derive(Debug)]
pub struct EventRing {
    items: VecDeque<Event>,
    capacity: usize,
}

impl EventRing {
    /// Creates an empty ring.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of resident events, clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event, handing it back if the ring is full.
    pub fn push(&mut self, event: Event) -> Result<(), Event> {
        if self.is_full() {
            return Err(event);
        }
        self.items.push_back(event);
        Ok(())
    }

    /// Removes the oldest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

impl Default for EventRing {
    fn default() -> Self {
        Self::new(256)
    }
}

#[test]
fn ring_keeps_fifo_order_and_capacity() {
    let mut ring = EventRing::new(2);
    let mut first = Event::new();
    first.set_trigger(1);
    let mut second = Event::new();
    second.set_trigger(2);

    assert!(ring.push(first).is_ok());
    assert!(ring.push(second).is_ok());
    assert!(ring.is_full());

    let rejected = ring.push(Event::new());
    assert!(rejected.is_err());
    assert_eq!(ring.len(), 2);

    assert_eq!(ring.pop().map(|ev| ev.trigger()), Some(Some(1)));
    assert_eq!(ring.pop().map(|ev| ev.trigger()), Some(Some(2)));
    assert!(ring.pop().is_none());
}

#[test]
fn zero_capacity_is_clamped() {
    let ring = EventRing::new(0);
    assert_eq!(ring.capacity(), 1);
    assert!(ring.is_empty());
    assert!(!ring.is_full());
}
