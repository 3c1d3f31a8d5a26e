//! Narrow interfaces to the external log system
//!
//! The engine never talks to a broker directly. A task owns one
//! [`InputClient`] for its partitions; all tasks share one [`OutputClient`].
//! Both are created by a [`ClientSupplier`] when the runtime starts.

pub mod memory;

#[cfg(feature = "kafka")]
pub mod kafka;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::record::{InputRecord, TopicPartition};

pub use memory::{MemoryClientSupplier, MemoryInputClient, MemoryOutputClient, SentRecord};

#[cfg(feature = "kafka")]
pub use kafka::{KafkaClientSupplier, KafkaInputClient, KafkaOutputClient};

/// Failure reported by a client, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Timeouts, disconnects and other conditions worth retrying
    #[error("transient: {0}")]
    Transient(String),

    /// Conditions retrying cannot fix
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ClientError {
    pub fn transient(message: impl Into<String>) -> Self {
        ClientError::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        ClientError::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Consumer side of the log system
#[async_trait]
pub trait InputClient: Send {
    /// Subscribe to the topics bound by the topology's sources
    async fn subscribe(&mut self, topics: &[String]) -> ClientResult<()>;

    /// Wait up to `timeout` for at most `max_records` records
    ///
    /// An empty batch means the timeout elapsed without data.
    async fn poll(&mut self, timeout: Duration, max_records: usize) -> ClientResult<Vec<InputRecord>>;

    /// Persist progress; each value is the offset of the last fully
    /// processed record of its partition
    async fn commit(&mut self, offsets: &BTreeMap<TopicPartition, i64>) -> ClientResult<()>;

    /// Release the consumer
    async fn close(&mut self) -> ClientResult<()> {
        Ok(())
    }
}

/// Producer side of the log system
#[async_trait]
pub trait OutputClient: Send + Sync {
    /// Write one record to `topic`
    async fn send(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> ClientResult<()>;

    /// Wait for all outstanding writes
    async fn flush(&self, timeout: Duration) -> ClientResult<()>;
}

/// Creates the clients a runtime needs
pub trait ClientSupplier: Send + Sync {
    /// Input client for the task with the given index
    fn input_client(&self, task_id: usize) -> ClientResult<Box<dyn InputClient>>;

    /// Output client shared by all tasks
    fn output_client(&self) -> ClientResult<Arc<dyn OutputClient>>;
}
