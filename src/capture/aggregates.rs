//! Rolling aggregates for one broadcast
//!
//! Counters accumulate in memory while a broadcast is capturing and are
//! flushed to the store periodically and on lifecycle transitions. Dirty
//! tracking keeps idle flush ticks from writing.

use crate::model::AggregateCounters;
use crate::protocol::NormalizedEvent;

/// In-memory rolling aggregates
#[derive(Debug, Default)]
pub struct Aggregates {
    counters: AggregateCounters,
    dirty: bool,
}

impl Aggregates {
    /// Create zeroed aggregates
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from counters recovered out of a persisted row
    ///
    /// A worker resuming a broadcast that survived a crash must not flush
    /// zeroes over what the previous process generation already persisted.
    pub fn resume(counters: AggregateCounters) -> Self {
        Self {
            counters,
            dirty: false,
        }
    }

    /// Fold one event into the counters
    ///
    /// Viewer counts update the peak via max; comments count alongside their
    /// row insert; gifts accumulate their repeat counts. Events without an
    /// aggregate dimension (join, control, terminal) are no-ops here.
    pub fn apply(&mut self, event: &NormalizedEvent) {
        match event {
            NormalizedEvent::Comment { .. } => {
                self.counters.comments += 1;
                self.dirty = true;
            }
            NormalizedEvent::Gift { repeat_count, .. } => {
                self.counters.gifts += i64::from(*repeat_count);
                self.dirty = true;
            }
            NormalizedEvent::Like { count, .. } => {
                self.counters.likes += i64::from(*count);
                self.dirty = true;
            }
            NormalizedEvent::Follow { .. } => {
                self.counters.follows += 1;
                self.dirty = true;
            }
            NormalizedEvent::Share { .. } => {
                self.counters.shares += 1;
                self.dirty = true;
            }
            NormalizedEvent::ViewerCount { count, .. } => {
                let count = i64::try_from(*count).unwrap_or(i64::MAX);
                if count > self.counters.peak_viewers {
                    self.counters.peak_viewers = count;
                    self.dirty = true;
                }
            }
            _ => {}
        }
    }

    /// Current counter values
    pub fn snapshot(&self) -> AggregateCounters {
        self.counters
    }

    /// Whether the counters changed since the last flush
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Mark the current values as flushed
    pub fn mark_flushed(&mut self) {
        self.dirty = false;
    }
}
