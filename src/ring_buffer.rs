//! Fixed-capacity, time-bucketed history of datapoints for one plugin.
//!
//! The buffer keeps one slot per distinct second. Samples that arrive for the
//! second already held at the cursor replace that slot; a new second advances
//! the cursor, wrapping to slot 0 once every slot has been used so the oldest
//! second is overwritten.

use std::iter::Chain;
use std::slice::Iter;

use crate::datapoint::Datapoint;

/// What a [`DatapointRing::push`] did with the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored in a slot that had never been written.
    Stored,
    /// Same second as the current slot; the slot now holds the new sample.
    Coalesced,
    /// Buffer was full; the oldest slot was overwritten.
    Evicted,
}

/// Circular datapoint store owned by a single tracking record.
#[derive(Debug, Clone)]
pub struct DatapointRing {
    slots: Vec<Datapoint>,
    capacity: usize,
    // None until the first push.
    cursor: Option<usize>,
}

impl DatapointRing {
    /// Create an empty ring.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. [`StatsConfig::validate`] rejects a zero
    /// capacity before any ring is built.
    ///
    /// [`StatsConfig::validate`]: crate::config::StatsConfig::validate
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "datapoint ring capacity must be non-zero");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            cursor: None,
        }
    }

    /// Record a sample according to the time-bucketing policy.
    pub fn push(&mut self, datapoint: Datapoint) -> PushOutcome {
        let current = match self.cursor {
            None => {
                self.slots.push(datapoint);
                self.cursor = Some(0);
                return PushOutcome::Stored;
            }
            Some(current) => current,
        };

        if self.slots[current].time == datapoint.time {
            self.slots[current] = datapoint;
            return PushOutcome::Coalesced;
        }

        let next = if current + 1 == self.capacity {
            0
        } else {
            current + 1
        };
        self.cursor = Some(next);

        if next == self.slots.len() {
            self.slots.push(datapoint);
            PushOutcome::Stored
        } else {
            self.slots[next] = datapoint;
            PushOutcome::Evicted
        }
    }

    /// Valid datapoints, oldest first.
    ///
    /// The iterator borrows the ring and can be recreated at any time; it
    /// never mutates the buffer.
    pub fn read_all(&self) -> Chain<Iter<'_, Datapoint>, Iter<'_, Datapoint>> {
        let split = match self.cursor {
            Some(cursor) if self.is_full() => cursor + 1,
            _ => self.slots.len(),
        };
        // Before the first wrap everything is already in order and the
        // second half is empty.
        let (newer, older) = self.slots.split_at(split);
        if older.is_empty() {
            newer.iter().chain(older.iter())
        } else {
            older.iter().chain(newer.iter())
        }
    }

    /// Most recently written datapoint.
    pub fn latest(&self) -> Option<&Datapoint> {
        self.cursor.map(|cursor| &self.slots[cursor])
    }

    /// Index of the slot last written, `None` while empty.
    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
