//! Fixed-capacity ordered buffer of demand records.

use std::collections::VecDeque;

use crate::models::demand::Demand;

/// Default number of records kept for display.
pub const DEFAULT_CAPACITY: usize = 50;

/// Oldest-first sequence of demand records with FIFO eviction.
///
/// New records are appended at the back; once capacity is exceeded the
/// oldest records are evicted from the front. Insertion order is
/// preserved and the buffer never exceeds its capacity. Duplicate
/// identifiers are not deduplicated here; a duplicate delivered during
/// the snapshot/live race window appears twice (known gap, matching
/// upstream behavior).
#[derive(Debug, Clone)]
pub struct DemandBuffer {
    items: VecDeque<Demand>,
    capacity: usize,
}

impl DemandBuffer {
    /// Creates an empty buffer with the given capacity (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    /// Appends a record, evicting the oldest if the buffer is full.
    pub fn push(&mut self, demand: Demand) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(demand);
    }

    /// Appends records in iteration order.
    pub fn extend(&mut self, demands: impl IntoIterator<Item = Demand>) {
        for demand in demands {
            self.push(demand);
        }
    }

    /// Drops all records, keeping the capacity.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns an owned oldest-first snapshot for consumers.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Demand> {
        self.items.iter().cloned().collect()
    }
}

impl Default for DemandBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
