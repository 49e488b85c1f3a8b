//! Rolling window of stable-part increments used for basis detection.

use crate::field::{FieldLayout, SolutionField};

/// Fixed-capacity FIFO of solution increments.
///
/// Slot 0 is seeded with a zero field, so the window reports full after
/// `capacity - 1` pushes. Slots are never reallocated: eviction rotates buffer
/// ownership and the displaced buffer is handed back to the caller.
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    slots: Vec<SolutionField>,
    latest: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize, layout: FieldLayout) -> Self {
        Self {
            slots: (0..capacity).map(|_| SolutionField::zeros(layout)).collect(),
            latest: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Always equals the capacity: unused slots are part of the window.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of samples currently held, the zero seed included.
    pub fn samples(&self) -> usize {
        if self.slots.is_empty() {
            0
        } else {
            self.latest + 1
        }
    }

    pub fn is_full(&self) -> bool {
        !self.slots.is_empty() && self.latest + 1 == self.slots.len()
    }

    /// Stores `delta` as the newest sample.
    ///
    /// On return `delta` owns the buffer that left the window: the evicted oldest
    /// sample when the window was full, otherwise an unused slot.
    pub fn push(&mut self, delta: &mut SolutionField) {
        if self.slots.is_empty() {
            return;
        }
        if self.is_full() {
            self.slots.rotate_left(1);
        } else {
            self.latest += 1;
        }
        std::mem::swap(&mut self.slots[self.latest], delta);
    }

    /// Sample `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<&SolutionField> {
        if index < self.samples() {
            self.slots.get(index)
        } else {
            None
        }
    }

    pub fn latest(&self) -> Option<&SolutionField> {
        self.slots.get(self.latest)
    }

    /// Held samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SolutionField> {
        self.slots[..self.samples()].iter()
    }

    /// Drops every sample but the latest, which becomes the oldest.
    pub fn reset(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        self.slots.swap(0, self.latest);
        self.latest = 0;
    }
}
