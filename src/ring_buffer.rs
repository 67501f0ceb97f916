use serde::{Deserialize, Serialize};

/// A fixed-capacity circular buffer.
///
/// The capacity is chosen at construction and never changes. Pushing into a
/// full buffer overwrites the oldest element. Elements are addressed by age:
/// `get(0)` is the most recent element, `get(len - 1)` the oldest.
///
/// The raw slot layout (`slots`, `head`, `len`) is exposed so that the buffer
/// can be persisted and restored bit-exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingBuffer<T> {
    slots: Box<[T]>,
    /// Index of the slot the next `push` writes to.
    head: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Creates an empty buffer. A capacity of 0 is bumped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![T::default(); capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    /// Rebuilds a buffer from its raw layout. `head` and `len` are clamped into
    /// the slot range so that a damaged record can never index out of bounds.
    pub fn from_parts(slots: Vec<T>, head: usize, len: usize) -> Self {
        if slots.is_empty() {
            return Self::new(1);
        }
        let capacity = slots.len();
        Self {
            slots: slots.into_boxed_slice(),
            head: head % capacity,
            len: len.min(capacity),
        }
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.slots.len();
        self.slots[self.head] = value;
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }

    /// Returns the element `offset` pushes ago (0 = most recent).
    pub fn get(&self, offset: usize) -> Option<T> {
        if offset >= self.len {
            return None;
        }
        let capacity = self.slots.len();
        let idx = (self.head + capacity - 1 - offset) % capacity;
        Some(self.slots[idx])
    }

    pub fn latest(&self) -> Option<T> {
        self.get(0)
    }

    /// Iterates from the most recent element to the oldest.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.len).filter_map(move |offset| self.get(offset))
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = T::default());
        self.head = 0;
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn head(&self) -> usize {
        self.head
    }

    pub fn slots(&self) -> &[T] {
        &self.slots
    }
}

impl<T: Copy + Default> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(1)
    }
}
