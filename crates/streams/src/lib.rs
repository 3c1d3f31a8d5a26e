//! Topology execution engine for partitioned logs
//!
//! Describe a graph of sources, stateful processors and sinks with a
//! [`TopologyBuilder`], then hand it to a [`StreamsRuntime`]. Every task
//! polls a batch of input records, dispatches each one depth-first through
//! the graph, fires stream-time punctuations and only then commits the
//! offsets it processed, which gives at-least-once delivery.
//!
//! The log system is reached through the [`InputClient`] and
//! [`OutputClient`] traits. Kafka implementations live behind the default
//! `kafka` feature; in-memory ones are always available.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod processor;
pub mod punctuation;
pub mod record;
pub mod runtime;
pub mod serdes;
pub mod task;
pub mod topology;

pub use client::{
    ClientError, ClientResult, ClientSupplier, InputClient, MemoryClientSupplier, MemoryInputClient,
    MemoryOutputClient, OutputClient, SentRecord,
};
#[cfg(feature = "kafka")]
pub use client::{KafkaClientSupplier, KafkaInputClient, KafkaOutputClient};

pub use config::{KafkaConfig, OffsetReset, RuntimeConfig, StreamsConfig};
pub use context::ProcessorContext;
pub use error::{Result, StreamsError, TopologyError};
pub use processor::Processor;
pub use punctuation::{PunctuationScheduler, StreamTime};
pub use record::{InputRecord, Origin, RecordContext, TopicPartition};
pub use runtime::{RuntimeState, ShutdownHandle, StreamsRuntime};
pub use serdes::{BytesSerde, DoubleSerde, IntegerSerde, JsonSerde, Serde, StringSerde};
pub use task::{StreamTask, TaskStats};
pub use topology::{Node, NodeId, NodeKind, Topology, TopologyBuilder};
