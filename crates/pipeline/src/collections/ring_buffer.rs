//! A fixed-capacity circular buffer with overwrite-on-full.
//!
//! Storage is allocated once. Until the buffer fills, pushes append; after
//! that each push overwrites the oldest slot and advances the head index
//! modulo the capacity, so inserts stay O(1) and memory stays bounded no
//! matter how many samples are recorded.
//!
//! # Complexity
//! - `push`, `get`, `len`, `is_empty`, `is_full`, `capacity`, `latest` are
//!   **O(1)**.
//! - `iter` and `to_vec` walk the buffer once.

/// A fixed-capacity circular buffer storing elements oldest-first.
///
/// # Examples
///
/// ```rust
/// use steadfast_pipeline::collections::RingBuffer;
///
/// let mut buffer = RingBuffer::new(3);
/// buffer.push(1);
/// buffer.push(2);
/// buffer.push(3);
/// buffer.push(4); // overwrites the oldest item (`1`)
///
/// assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
/// assert_eq!(buffer.get(0), Some(&2));
/// assert_eq!(buffer.latest(), Some(&4));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    /// Index of the oldest element once the buffer has wrapped
    head: usize,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a new buffer with the provided capacity.
    ///
    /// A capacity of zero is clamped to `1`.
    #[inline]
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { slots: Vec::with_capacity(capacity), head: 0, capacity }
    }

    /// Pushes an item, overwriting the oldest item when full.
    ///
    /// Returns the overwritten item, if any.
    #[inline]
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(item);
            return None;
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], item);
        self.head = (self.head + 1) % self.capacity;
        Some(evicted)
    }

    /// Element at logical index `idx`, where `0` is the oldest.
    #[inline]
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.slots.len() {
            return None;
        }
        self.slots.get((self.head + idx) % self.slots.len())
    }

    /// The most recently pushed element.
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.len().checked_sub(1).and_then(|idx| self.get(idx))
    }

    /// Number of items currently stored.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// `true` when the buffer has no items.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `true` once the buffer reached its capacity.
    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Maximum number of items the buffer can hold.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Removes all elements, keeping the allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    /// Iterates from oldest to newest.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the contents oldest-first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<T> Extend<T> for RingBuffer<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}
