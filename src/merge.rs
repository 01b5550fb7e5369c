//! Reconciles the snapshot batch with live creation events.
//!
//! The snapshot and the live subscription race: events may arrive
//! before, during, or after the snapshot resolves. Events arriving
//! before initialization are parked in arrival order and flushed
//! immediately after the snapshot seeds the buffer, preserving relative
//! live-arrival order without attempting chronological interleave with
//! snapshot items (documented limitation).

use tracing::debug;

use crate::buffer::DemandBuffer;
use crate::models::demand::Demand;

/// Merges the two event sources into one ordered, capacity-bound buffer.
///
/// All mutation happens on the single consumer of the session's message
/// channel; the merger itself is plain sequential state.
pub struct StreamMerger {
    buffer: DemandBuffer,
    pending: Vec<Demand>,
    snapshot_ready: bool,
}

impl StreamMerger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: DemandBuffer::with_capacity(capacity),
            pending: Vec::new(),
            snapshot_ready: false,
        }
    }

    /// Marks the start of a new session: the next snapshot result seeds
    /// the buffer and live events park until it lands.
    pub fn begin_session(&mut self) {
        self.snapshot_ready = false;
        self.pending.clear();
    }

    /// Seeds the buffer from a resolved snapshot (most-recent-first),
    /// then flushes any parked live events in arrival order.
    pub fn seed_snapshot(&mut self, mut newest_first: Vec<Demand>) {
        newest_first.reverse();
        self.buffer.clear();
        self.buffer.extend(newest_first);
        self.flush_pending();
    }

    /// Records that the snapshot failed: the buffer starts empty and
    /// parked live events flush so the stream still populates it.
    pub fn snapshot_failed(&mut self) {
        self.buffer.clear();
        self.flush_pending();
    }

    /// Ingests one live creation event.
    pub fn live_event(&mut self, demand: Demand) {
        if self.snapshot_ready {
            self.buffer.push(demand);
        } else {
            debug!(id = %demand.id, "Parking live event until snapshot resolves");
            self.pending.push(demand);
        }
    }

    /// Returns an owned oldest-first view of the merged sequence.
    #[must_use]
    pub fn demands(&self) -> Vec<Demand> {
        self.buffer.to_vec()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn flush_pending(&mut self) {
        self.snapshot_ready = true;
        for demand in self.pending.drain(..) {
            self.buffer.push(demand);
        }
    }
}
