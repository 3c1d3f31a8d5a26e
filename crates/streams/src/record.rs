//! Record and partition identifiers shared by the task loop and the clients

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic partition identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition)
    }
}

/// A record returned by an input client poll
///
/// Keys and values are opaque bytes; an absent key is represented by `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    /// Record timestamp in milliseconds
    pub timestamp: i64,
}

impl InputRecord {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: Option<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        timestamp: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key,
            value: value.into(),
            timestamp,
        }
    }

    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    pub fn context(&self) -> RecordContext {
        RecordContext {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
            timestamp: self.timestamp,
        }
    }
}

/// Metadata of the input record currently being dispatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordContext {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub timestamp: i64,
}

impl fmt::Display for RecordContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{} (timestamp {})",
            self.topic, self.partition, self.offset, self.timestamp
        )
    }
}

/// What the engine was doing when a node failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Initialise,
    Record(RecordContext),
    Punctuation { timestamp: i64 },
    Close,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Initialise => write!(f, "initialise"),
            Origin::Record(ctx) => write!(f, "process of record {}", ctx),
            Origin::Punctuation { timestamp } => write!(f, "punctuate at {}", timestamp),
            Origin::Close => write!(f, "close"),
        }
    }
}
