use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use crate::record::ResourceId;

/// Default time a room may stay empty before it is evicted.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::minutes(10);

/// Result of feeding one occupancy observation to [`EmptyTimers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idleness {
    /// The room has occupants; any empty timer was cleared.
    Occupied,
    /// Empty since the given instant, still under the threshold.
    EmptySince(DateTime<Utc>),
    /// Empty since the given instant and at or past the threshold.
    Idle(DateTime<Utc>),
}

/// Tracks when each managed room was first seen empty.
///
/// Process-local and never persisted: a restart resets every idle clock.
#[derive(Debug)]
pub struct EmptyTimers {
    first_empty_at: HashMap<ResourceId, DateTime<Utc>>,
    idle_threshold: Duration,
}

impl Default for EmptyTimers {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD)
    }
}

impl EmptyTimers {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            first_empty_at: HashMap::new(),
            idle_threshold,
        }
    }

    /// Record one occupancy observation taken at `now`.
    pub fn observe(&mut self, id: ResourceId, occupants: u32, now: DateTime<Utc>) -> Idleness {
        if occupants > 0 {
            self.first_empty_at.remove(&id);
            return Idleness::Occupied;
        }

        let since = *self.first_empty_at.entry(id).or_insert(now);
        if now - since >= self.idle_threshold {
            Idleness::Idle(since)
        } else {
            Idleness::EmptySince(since)
        }
    }

    pub fn first_empty_at(&self, id: ResourceId) -> Option<DateTime<Utc>> {
        self.first_empty_at.get(&id).copied()
    }

    pub fn purge(&mut self, id: ResourceId) {
        self.first_empty_at.remove(&id);
    }

    /// Drop entries whose room is no longer registered.
    pub fn retain_registered(&mut self, registered: &HashSet<ResourceId>) {
        self.first_empty_at.retain(|id, _| registered.contains(id));
    }

    pub fn len(&self) -> usize {
        self.first_empty_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_empty_at.is_empty()
    }
}
