//! Processing nodes of a topology

use std::fmt;
use std::sync::Arc;

use crate::processor::Processor;

/// Creates a fresh processor instance for each task
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

/// Dense node identifier; also the node's registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Variant-specific part of a node
#[derive(Clone)]
pub enum NodeKind {
    /// Entry point bound to one or more input topics
    Source { topics: Vec<String> },

    /// User logic, instantiated once per task
    Processor { factory: ProcessorFactory },

    /// Exit point bound to one output topic
    Sink { topic: String },
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Source { .. } => "source",
            NodeKind::Processor { .. } => "processor",
            NodeKind::Sink { .. } => "sink",
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Source { topics } => f.debug_struct("Source").field("topics", topics).finish(),
            NodeKind::Processor { .. } => f.debug_struct("Processor").finish_non_exhaustive(),
            NodeKind::Sink { topic } => f.debug_struct("Sink").field("topic", topic).finish(),
        }
    }
}

/// A validated node with resolved edges
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
    pub(crate) parents: Vec<NodeId>,
    pub(crate) children: Vec<NodeId>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Parents in declaration order
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    /// Children in the order they were declared
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, NodeKind::Source { .. })
    }

    pub fn is_processor(&self) -> bool {
        matches!(self.kind, NodeKind::Processor { .. })
    }

    pub fn is_sink(&self) -> bool {
        matches!(self.kind, NodeKind::Sink { .. })
    }
}
