//! Lot bookkeeping: bounded capacity and the priority queue of waiting
//! sessions.
//!
//! A [`Lot`] tracks how many spots are occupied and which sessions are
//! waiting. Queue entries are ordered by `(priority rank, sequence)` on
//! every insertion; the sequence number is a manager-wide monotonic counter
//! assigned at enqueue time, so equal-rank entries serve in arrival order
//! without depending on sort stability.

use curbside_core::types::SessionId;

/// One waiting session in a lot's queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    /// The queued session
    pub session: SessionId,
    /// Priority rank; lower is served first
    pub rank: u8,
    /// Enqueue sequence number; breaks rank ties in arrival order
    pub seq: u64,
}

/// Priority queue of sessions waiting on a lot, ordered by `(rank, seq)`.
#[derive(Debug, Default)]
pub struct SpotQueue {
    entries: Vec<QueueEntry>,
}

impl SpotQueue {
    /// Inserts a session at its ordered position
    pub fn insert(&mut self, session: SessionId, rank: u8, seq: u64) {
        let at = self
            .entries
            .partition_point(|e| (e.rank, e.seq) <= (rank, seq));
        self.entries.insert(at, QueueEntry { session, rank, seq });
    }

    /// Removes a session's entry, if queued
    pub fn remove(&mut self, session: SessionId) {
        self.entries.retain(|e| e.session != session);
    }

    /// Returns the 1-based position of a session, or 0 if not queued
    #[must_use]
    pub fn position(&self, session: SessionId) -> usize {
        self.entries
            .iter()
            .position(|e| e.session == session)
            .map_or(0, |i| i + 1)
    }

    /// Number of waiting sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A bounded lot: fixed capacity, current occupancy, and its waiting queue.
///
/// Spots are taken at session completion (first to complete wins), not at
/// enqueue time; the queue orders service and reports positions.
#[derive(Debug)]
pub struct Lot {
    capacity: usize,
    occupied: usize,
    /// Sessions waiting on this lot
    pub queue: SpotQueue,
}

impl Lot {
    /// Creates an empty lot with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            occupied: 0,
            queue: SpotQueue::default(),
        }
    }

    /// Configured number of spots
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Currently occupied spots
    #[must_use]
    pub const fn occupied(&self) -> usize {
        self.occupied
    }

    /// Whether every spot is taken
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }

    /// Takes one spot. Returns `false` when the lot is full.
    pub const fn occupy(&mut self) -> bool {
        if self.is_full() {
            return false;
        }
        self.occupied += 1;
        true
    }

    /// Releases one spot (a vehicle left the lot)
    pub const fn vacate(&mut self) {
        self.occupied = self.occupied.saturating_sub(1);
    }
}
