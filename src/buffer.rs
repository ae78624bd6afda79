//! Bounded FIFO between the pipeline (producer) and the uploader (consumer).
//!
//! Pushing into a full buffer overwrites the oldest entry, so the buffer
//! always holds the freshest `capacity` packets.  Draining is all-or-nothing
//! and a failed upload hands the drained packets back through
//! [`RingBuffer::restore`].

use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

pub const DEFAULT_CAPACITY: usize = 20;

/// Fixed-capacity ring with head/tail/full indices.
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    full: bool,
    overwritten: u32,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            full: false,
            overwritten: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn size(&self) -> usize {
        if self.full {
            self.capacity()
        } else if self.head >= self.tail {
            self.head - self.tail
        } else {
            self.capacity() - self.tail + self.head
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Append, returning the evicted oldest entry when the buffer was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let cap = self.capacity();
        let evicted = if self.full {
            self.tail = (self.tail + 1) % cap;
            self.overwritten += 1;
            self.slots[self.head].take()
        } else {
            None
        };
        self.slots[self.head] = Some(entry);
        self.head = (self.head + 1) % cap;
        self.full = self.head == self.tail;
        evicted
    }

    /// Remove and return every entry, oldest first.
    pub fn drain_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.size());
        while !self.is_empty() {
            if let Some(entry) = self.slots[self.tail].take() {
                out.push(entry);
            }
            self.tail = (self.tail + 1) % self.capacity();
            self.full = false;
        }
        self.head = 0;
        self.tail = 0;
        out
    }

    /// Put drained entries back in front of anything pushed since the drain.
    ///
    /// The buffer ends with the last `capacity` entries of
    /// `drained ++ pushed_meanwhile`, relative order preserved.
    pub fn restore(&mut self, drained: Vec<T>) {
        let meanwhile = self.drain_all();
        let total = drained.len() + meanwhile.len();
        let skip = total.saturating_sub(self.capacity());
        self.overwritten += skip as u32;
        for entry in drained.into_iter().chain(meanwhile).skip(skip) {
            self.push(entry);
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.full = false;
    }

    /// Entries lost to overwrite-oldest since boot.
    pub fn overwritten(&self) -> u32 {
        self.overwritten
    }

    /// Oldest-first view without draining.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.capacity();
        (0..self.size()).filter_map(move |i| self.slots[(self.tail + i) % cap].as_ref())
    }
}

/// Ring buffer shared between the poll and upload paths.
///
/// Every access runs inside a critical section, so push and drain/restore
/// are serialized even when the two tasks live on different threads.
pub struct SharedRingBuffer<T> {
    inner: CriticalSectionMutex<RefCell<RingBuffer<T>>>,
}

impl<T> SharedRingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: CriticalSectionMutex::new(RefCell::new(RingBuffer::new(capacity))),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut RingBuffer<T>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    pub fn push(&self, entry: T) -> Option<T> {
        self.with(|rb| rb.push(entry))
    }

    pub fn drain_all(&self) -> Vec<T> {
        self.with(RingBuffer::drain_all)
    }

    pub fn restore(&self, drained: Vec<T>) {
        self.with(|rb| rb.restore(drained))
    }

    pub fn size(&self) -> usize {
        self.with(|rb| rb.size())
    }

    pub fn is_empty(&self) -> bool {
        self.with(|rb| rb.is_empty())
    }

    pub fn clear(&self) {
        self.with(RingBuffer::clear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut rb = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        assert_eq!(rb.size(), 2);
        assert_eq!(rb.drain_all(), vec![1, 2]);
        assert!(rb.is_empty());
    }

    #[test]
    fn overwrites_oldest_when_full() {
        let mut rb = RingBuffer::new(3);
        for i in 1..=3 {
            assert_eq!(rb.push(i), None);
        }
        assert!(rb.is_full());
        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.size(), 3);
        assert_eq!(rb.overwritten(), 1);
        assert_eq!(rb.drain_all(), vec![2, 3, 4]);
    }

    #[test]
    fn restore_puts_drained_before_new_entries() {
        let mut rb = RingBuffer::new(5);
        rb.push(1);
        rb.push(2);
        let drained = rb.drain_all();
        rb.push(3);
        rb.restore(drained);
        assert_eq!(rb.drain_all(), vec![1, 2, 3]);
    }

    #[test]
    fn restore_drops_oldest_beyond_capacity() {
        let mut rb = RingBuffer::new(3);
        rb.push(1);
        rb.push(2);
        let drained = rb.drain_all();
        rb.push(3);
        rb.push(4);
        rb.restore(drained);
        assert_eq!(rb.size(), 3);
        assert_eq!(rb.drain_all(), vec![2, 3, 4]);
    }

    #[test]
    fn clear_empties() {
        let mut rb = RingBuffer::new(2);
        rb.push(1);
        rb.push(2);
        rb.clear();
        assert!(rb.is_empty());
        assert_eq!(rb.size(), 0);
        rb.push(9);
        assert_eq!(rb.iter().copied().collect::<Vec<_>>(), vec![9]);
    }

    #[test]
    fn shared_buffer_serializes_access() {
        let shared = SharedRingBuffer::new(DEFAULT_CAPACITY);
        shared.push("a");
        shared.push("b");
        let drained = shared.drain_all();
        assert!(shared.is_empty());
        shared.restore(drained);
        assert_eq!(shared.size(), 2);
    }
}
