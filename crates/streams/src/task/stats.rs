//! Task statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters of one task, published after every cycle
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskStats {
    /// Task index within the runtime
    pub task_id: usize,

    /// Polls that returned at least one record
    pub batches: u64,

    /// Input records whose dispatch completed
    pub records_processed: u64,

    /// Records delivered to a downstream node
    pub records_forwarded: u64,

    /// Records written to an output topic
    pub records_sent: u64,

    /// Punctuate callbacks fired
    pub punctuations: u64,

    /// Successful offset commits
    pub commits: u64,

    pub poll_retries: u64,
    pub commit_retries: u64,
    pub sink_retries: u64,

    /// Current stream time, if any record was seen
    pub stream_time: Option<i64>,

    pub last_commit: Option<DateTime<Utc>>,
}

impl TaskStats {
    pub fn new(task_id: usize) -> Self {
        Self {
            task_id,
            ..Self::default()
        }
    }

    pub fn inc_commits(&mut self) {
        self.commits += 1;
        self.last_commit = Some(Utc::now());
    }

    /// Sum of counters across tasks
    pub fn merge(&mut self, other: &TaskStats) {
        self.batches += other.batches;
        self.records_processed += other.records_processed;
        self.records_forwarded += other.records_forwarded;
        self.records_sent += other.records_sent;
        self.punctuations += other.punctuations;
        self.commits += other.commits;
        self.poll_retries += other.poll_retries;
        self.commit_retries += other.commit_retries;
        self.sink_retries += other.sink_retries;
        self.stream_time = self.stream_time.max(other.stream_time);
        self.last_commit = self.last_commit.max(other.last_commit);
    }
}
