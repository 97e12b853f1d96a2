//! Request queue primitive.
//!
//! An ordered queue of [`Bio`]s supporting plain FIFO append and
//! offset-sorted insertion. Sorted insertion keeps arrival order among
//! requests with equal start offsets, so sorting never starves a request
//! behind an endless stream of equal-offset arrivals.

use std::collections::VecDeque;

use crate::bio::Bio;

/// Ordered queue of pending requests.
#[derive(Debug, Default)]
pub struct Bioq {
    entries: VecDeque<Bio>,
}

impl Bioq {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends in arrival order.
    #[inline]
    pub fn push_back(&mut self, bio: Bio) {
        self.entries.push_back(bio);
    }

    /// Inserts in ascending start-offset order, after any existing entry
    /// with the same offset.
    pub fn insert_sorted(&mut self, bio: Bio) {
        let pos = self
            .entries
            .iter()
            .position(|e| e.offset > bio.offset)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, bio);
    }

    /// Removes and returns the head of the queue.
    #[inline]
    pub fn pop_front(&mut self) -> Option<Bio> {
        self.entries.pop_front()
    }

    /// Returns a reference to the head of the queue.
    #[inline]
    pub fn front(&self) -> Option<&Bio> {
        self.entries.front()
    }

    /// Number of queued requests.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes and returns every queued request, head first.
    pub fn drain(&mut self) -> Vec<Bio> {
        self.entries.drain(..).collect()
    }
}
