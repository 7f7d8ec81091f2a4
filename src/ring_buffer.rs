//! Fixed-capacity circular queue shared between one producer and one consumer.
//!
//! Used for the audio device's available/playing buffer rings and for the
//! texture slot handoff between the decode worker and the render thread.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::time::{Duration, Instant};

struct Slots<T> {
    items: Box<[Option<T>]>,
    read: usize,
    len: usize,
}

impl<T> Slots<T> {
    fn write_index(&self) -> usize {
        (self.read + self.len) % self.items.len()
    }

    fn push(&mut self, item: T) -> Result<(), T> {
        if self.len == self.items.len() {
            return Err(item);
        }
        let idx = self.write_index();
        self.items[idx] = Some(item);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.items[self.read].take();
        self.read = (self.read + 1) % self.items.len();
        self.len -= 1;
        item
    }
}

/// A bounded FIFO ring with non-blocking and timed operations.
pub struct RingBuffer<T> {
    slots: Mutex<Slots<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let items = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: Mutex::new(Slots {
                items: items.into_boxed_slice(),
                read: 0,
                len: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Creates a full ring whose capacity equals the number of `items`.
    ///
    /// Items are handed out in the given order.
    pub fn full(items: Vec<T>) -> Self {
        let ring = Self::new(items.len());
        {
            let mut slots = ring.slots.lock();
            for item in items {
                // capacity was sized from the vector
                let _ = slots.push(item);
            }
        }
        ring
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().items.len()
    }

    pub fn size(&self) -> usize {
        self.slots.lock().len
    }

    pub fn free_slots(&self) -> usize {
        let slots = self.slots.lock();
        slots.items.len() - slots.len
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_slots() == 0
    }

    /// Appends `item`, handing it back if the ring is full.
    pub fn put(&self, item: T) -> Result<(), T> {
        let result = self.slots.lock().push(item);
        if result.is_ok() {
            self.not_empty.notify_one();
        }
        result
    }

    /// Removes the oldest item, if any.
    pub fn get(&self) -> Option<T> {
        let item = self.slots.lock().pop();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Removes the oldest item, waiting up to `timeout` for one to arrive.
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        loop {
            if let Some(item) = slots.pop() {
                drop(slots);
                self.not_full.notify_one();
                return Some(item);
            }
            if self.not_empty.wait_until(&mut slots, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Appends `item`, waiting up to `timeout` for a free slot.
    pub fn put_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut slots = self.slots.lock();
        let mut item = item;
        loop {
            match slots.push(item) {
                Ok(()) => {
                    drop(slots);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                Err(rejected) => item = rejected,
            }
            if self.not_full.wait_until(&mut slots, deadline).timed_out() {
                return Err(item);
            }
        }
    }

    /// Removes and returns every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut slots = self.slots.lock();
        let mut out = Vec::with_capacity(slots.len);
        while let Some(item) = slots.pop() {
            out.push(item);
        }
        drop(slots);
        self.not_full.notify_all();
        out
    }

    /// Drops every queued item.
    pub fn clear(&self) {
        self.drain();
    }
}

impl<T: Clone> RingBuffer<T> {
    /// A copy of the oldest item without removing it.
    pub fn peek(&self) -> Option<T> {
        let slots = self.slots.lock();
        if slots.len == 0 {
            return None;
        }
        slots.items[slots.read].clone()
    }

    /// Copies of the queued items, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        let slots = self.slots.lock();
        let cap = slots.items.len();
        (0..slots.len)
            .filter_map(|i| slots.items[(slots.read + i) % cap].clone())
            .collect()
    }
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &slots.items.len())
            .field("size", &slots.len)
            .finish()
    }
}
