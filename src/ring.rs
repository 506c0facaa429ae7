use std::collections::VecDeque;

/// Circular buffer keeping the last `capacity` values, the oldest one being evicted on
/// every push once full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// The value pushed `capacity` pushes ago. None until the buffer is full, so a window
    /// is only compared once it spans its whole length.
    pub fn oldest(&self) -> Option<&T> {
        if self.is_full() {
            self.values.front()
        } else {
            None
        }
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
