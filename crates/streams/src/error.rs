//! Error types for the topology execution engine
//!
//! Build-time failures are reported as [`TopologyError`] wrapped in
//! [`StreamsError::TopologyValidation`]. Everything raised while a task runs
//! is a [`StreamsError`]; transient client failures are retried inside the
//! task loop and only surface once they are classified as fatal.

use std::time::Duration;
use thiserror::Error;

use crate::client::ClientError;
use crate::record::Origin;

/// Main engine error type
#[derive(Error, Debug)]
pub enum StreamsError {
    /// Malformed topology, raised by `TopologyBuilder::build`
    #[error("topology validation failed: {0}")]
    TopologyValidation(#[from] TopologyError),

    /// Non-positive punctuation interval
    #[error("invalid schedule for node '{node}': interval must be positive, got {interval:?}")]
    InvalidSchedule { node: String, interval: Duration },

    /// Failure raised inside a processor callback
    #[error("processor '{node}' failed during {origin}: {source}")]
    ProcessorRuntime {
        node: String,
        origin: Origin,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Output write that kept failing after its retries
    #[error("sink '{node}' could not write to '{topic}' after {attempts} attempts ({origin}): {source}")]
    SinkWrite {
        node: String,
        topic: String,
        origin: Origin,
        attempts: u32,
        source: ClientError,
    },

    /// Recoverable poll failure; retried by the task loop
    #[error("transient poll failure: {0}")]
    PollTransient(#[source] ClientError),

    /// Offsets could not be committed
    #[error("offset commit failed after {attempts} attempts: {source}")]
    CommitFailure { attempts: u32, source: ClientError },

    /// Non-retryable client failure
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Configuration(#[from] wks_config::ConfigError),

    /// Serialization/deserialization errors
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Task or runtime lifecycle failure
    #[error("lifecycle error: {0}")]
    Lifecycle(String),

    /// Error raised by user code through `anyhow`
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StreamsError {
    /// Wrap an error raised by a node callback, keeping attribution that
    /// a downstream node already recorded.
    pub fn in_node(self, node: &str, origin: &Origin) -> Self {
        match self {
            attributed @ (StreamsError::ProcessorRuntime { .. }
            | StreamsError::InvalidSchedule { .. }
            | StreamsError::SinkWrite { .. }) => attributed,
            other => StreamsError::ProcessorRuntime {
                node: node.to_string(),
                origin: origin.clone(),
                source: Box::new(other),
            },
        }
    }

    /// Whether the task loop retries this error instead of stopping
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamsError::PollTransient(_))
    }

    /// Name of the node the error is attributed to, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            StreamsError::ProcessorRuntime { node, .. }
            | StreamsError::InvalidSchedule { node, .. }
            | StreamsError::SinkWrite { node, .. } => Some(node),
            _ => None,
        }
    }
}

/// Topology validation errors
///
/// Each variant names the invariant the declared graph violates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No nodes were declared
    #[error("topology has no nodes")]
    Empty,

    /// Two nodes share a name
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    /// A node references a parent that was never declared
    #[error("node '{node}' references unknown parent '{parent}'")]
    UnknownParent { node: String, parent: String },

    /// A processor or sink was declared without parents
    #[error("node '{0}' has no parent and is not reachable from any source")]
    MissingParent(String),

    /// Sinks terminate the graph and cannot feed other nodes
    #[error("node '{node}' declares sink '{parent}' as parent")]
    SinkAsParent { node: String, parent: String },

    /// The declared edges contain a cycle
    #[error("cycle detected involving nodes: {}", .0.join(", "))]
    CycleDetected(Vec<String>),

    /// A source was declared without input topics
    #[error("source '{0}' binds no input topics")]
    SourceWithoutTopics(String),

    /// The same input topic is bound by two sources
    #[error("topic '{topic}' is bound by both '{first}' and '{second}'")]
    DuplicateTopic {
        topic: String,
        first: String,
        second: String,
    },

    /// A node name or topic is empty
    #[error("invalid node '{node}': {reason}")]
    InvalidNode { node: String, reason: String },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, StreamsError>;

impl From<serde_json::Error> for StreamsError {
    fn from(err: serde_json::Error) -> Self {
        StreamsError::Serialization(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for StreamsError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        StreamsError::Serialization(err.to_string())
    }
}

impl From<std::str::Utf8Error> for StreamsError {
    fn from(err: std::str::Utf8Error) -> Self {
        StreamsError::Serialization(err.to_string())
    }
}
