//! Per-partition progress awaiting commit

use std::collections::BTreeMap;

use crate::record::TopicPartition;

/// Highest fully processed offset per partition since the last commit
#[derive(Debug, Default, Clone)]
pub struct OffsetCursor {
    pending: BTreeMap<TopicPartition, i64>,
}

impl OffsetCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that every record up to `offset` on `tp` completed dispatch
    pub fn advance(&mut self, tp: TopicPartition, offset: i64) {
        let entry = self.pending.entry(tp).or_insert(offset);
        if offset > *entry {
            *entry = offset;
        }
    }

    pub fn pending(&self) -> &BTreeMap<TopicPartition, i64> {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop progress that has been committed
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
