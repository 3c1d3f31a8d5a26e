//! Stream-time driven punctuation
//!
//! Stream time is the largest record timestamp a task has seen. It never
//! moves backwards, so out-of-order timestamps across partitions cannot make
//! a punctuation fire twice or out of order.

use std::time::Duration;

use crate::topology::NodeId;

/// Monotonic logical clock of one task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTime {
    current: Option<i64>,
}

impl StreamTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in a record timestamp and return the resulting stream time
    pub fn observe(&mut self, timestamp: i64) -> i64 {
        let next = match self.current {
            Some(current) => current.max(timestamp),
            None => timestamp,
        };
        self.current = Some(next);
        next
    }

    /// `None` until the first record is observed
    pub fn current(&self) -> Option<i64> {
        self.current
    }
}

/// Schedule state of one processor node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunctuationEntry {
    pub node: NodeId,
    /// Interval in stream-time milliseconds
    pub interval: i64,
    /// `None` while the task has not observed any stream time
    pub next_due: Option<i64>,
}

/// A punctuation to fire now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Punctuation {
    pub node: NodeId,
    /// The due time being fired
    pub timestamp: i64,
}

/// Owns every punctuation entry of a task
#[derive(Debug, Default)]
pub struct PunctuationScheduler {
    entries: Vec<PunctuationEntry>,
}

impl PunctuationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds in `interval`, or `None` when it is not positive at
    /// stream-time resolution
    pub fn interval_millis(interval: Duration) -> Option<i64> {
        let millis = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
        (millis > 0).then_some(millis)
    }

    /// Register or replace the schedule of `node`
    ///
    /// The next due time is `stream_time + interval`; without stream time it
    /// is set once the first record is observed.
    pub fn schedule(&mut self, node: NodeId, interval: i64, stream_time: Option<i64>) {
        let next_due = stream_time.map(|now| now.saturating_add(interval));
        match self.entries.iter_mut().find(|entry| entry.node == node) {
            Some(entry) => {
                entry.interval = interval;
                entry.next_due = next_due;
            }
            None => self.entries.push(PunctuationEntry {
                node,
                interval,
                next_due,
            }),
        }
    }

    /// Anchor entries that were scheduled before stream time existed
    pub fn on_stream_time(&mut self, stream_time: i64) {
        for entry in &mut self.entries {
            if entry.next_due.is_none() {
                entry.next_due = Some(stream_time.saturating_add(entry.interval));
            }
        }
    }

    /// Take the earliest punctuation due at `stream_time`
    ///
    /// Ties on the due time go to the node registered first. The entry is
    /// advanced to `due + interval` before returning, so a reschedule from
    /// inside the punctuate callback replaces it.
    pub fn pop_due(&mut self, stream_time: i64) -> Option<Punctuation> {
        let entry = self
            .entries
            .iter_mut()
            .filter_map(|entry| match entry.next_due {
                Some(due) if due <= stream_time => Some((due, entry)),
                _ => None,
            })
            .min_by_key(|(due, entry)| (*due, entry.node))
            .map(|(_, entry)| entry)?;

        let due = entry.next_due?;
        entry.next_due = Some(due.saturating_add(entry.interval));
        Some(Punctuation {
            node: entry.node,
            timestamp: due,
        })
    }

    pub fn entry(&self, node: NodeId) -> Option<&PunctuationEntry> {
        self.entries.iter().find(|entry| entry.node == node)
    }

    pub fn entries(&self) -> &[PunctuationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
