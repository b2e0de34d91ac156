// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Slots, cursors and occupancy; only ever touched under the monitor lock.
#[derive(Debug)]
struct RingState<T> {
    slots: Vec<Option<T>>,
    /// next slot to write
    head: usize,
    /// next slot to read
    tail: usize,
    /// occupied slots, `head == (tail + len) % capacity`
    len: usize,
    closed: bool,
}

impl<T> RingState<T> {
    fn take(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let item = self.slots[self.tail].take();
        debug_assert!(item.is_some(), "occupied slot {} was empty", self.tail);
        self.tail = (self.tail + 1) % self.slots.len();
        self.len -= 1;
        item
    }

    fn put(&mut self, item: T) {
        debug_assert!(self.slots[self.head].is_none(), "slot {} overwritten", self.head);
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % self.slots.len();
        self.len += 1;
    }
}

/// Bounded FIFO between one producer and a pool of consumers.
///
/// A full buffer blocks the producer instead of overwriting: nothing that
/// was accepted is ever dropped. The lock is held only for index
/// bookkeeping, so consumers process what they took in parallel.
#[derive(Debug)]
pub struct RingBuffer<T> {
    state: Mutex<RingState<T>>,
    /// broadcast whenever a slot frees up
    slot_free: Condvar,
    /// signalled once per enqueued item
    data_available: Condvar,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                len: 0,
                closed: false,
            }),
            slot_free: Condvar::new(),
            data_available: Condvar::new(),
            capacity,
        }
    }

    /// Appends `item`, blocking while the buffer is full.
    ///
    /// The item is handed back only if the buffer is closed before a slot
    /// frees up.
    pub fn enqueue(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.len == self.capacity && !state.closed {
            warn!("ring buffer is full, producer waiting for a free slot");
            while state.len == self.capacity && !state.closed {
                self.slot_free.wait(&mut state);
            }
        }
        if state.closed {
            return Err(item);
        }
        state.put(item);
        drop(state);
        self.data_available.notify_one();
        Ok(())
    }

    /// Takes the oldest pending item without waiting.
    pub fn try_dequeue(&self) -> Option<T> {
        let item = self.state.lock().take();
        if item.is_some() {
            self.slot_free.notify_all();
        }
        item
    }

    /// Takes the oldest pending item, waiting for one to arrive.
    ///
    /// Returns `None` once the buffer is closed, even if items are still
    /// pending.
    pub fn dequeue_wait(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.take() {
                drop(state);
                self.slot_free.notify_all();
                return Some(item);
            }
            self.data_available.wait(&mut state);
        }
    }

    /// Wakes every waiting producer and consumer; later waits return immediately.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.data_available.notify_all();
        self.slot_free.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
