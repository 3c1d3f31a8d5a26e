//! Immutable processing graph
//!
//! A [`Topology`] is produced by [`TopologyBuilder::build`] and shared
//! read-only by every task. It exposes lookups only; registering nodes after
//! `build` does not type-check:
//!
//! ```compile_fail
//! use wks_streams::TopologyBuilder;
//!
//! let builder = TopologyBuilder::new().source("input", ["text"]);
//! let topology = builder.build().unwrap();
//! let topology = topology.sink("output", "text-out", &["input"]);
//! ```

mod builder;
mod node;

pub use builder::TopologyBuilder;
pub use node::{Node, NodeId, NodeKind, ProcessorFactory};

use std::collections::HashMap;
use std::fmt;

/// Validated, frozen processing graph
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    name_index: HashMap<String, NodeId>,
    topic_index: HashMap<String, NodeId>,
}

impl Topology {
    pub(crate) fn new(
        nodes: Vec<Node>,
        name_index: HashMap<String, NodeId>,
        topic_index: HashMap<String, NodeId>,
    ) -> Self {
        Self {
            nodes,
            name_index,
            topic_index,
        }
    }

    /// Start a new builder
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::new()
    }

    /// Nodes in registration order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` was not issued by this topology.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.name_index.get(name).map(|id| self.node(*id))
    }

    /// Source bound to an input topic
    pub fn source_for_topic(&self, topic: &str) -> Option<&Node> {
        self.topic_index.get(topic).map(|id| self.node(*id))
    }

    /// Every input topic, in source registration order
    pub fn input_topics(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|node| match &node.kind {
                NodeKind::Source { topics } => Some(topics.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Every output topic, deduplicated, in sink registration order
    pub fn output_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for node in &self.nodes {
            if let NodeKind::Sink { topic } = &node.kind {
                if !topics.contains(topic) {
                    topics.push(topic.clone());
                }
            }
        }
        topics
    }

    pub fn processors(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_processor())
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Topology:")?;
        for node in &self.nodes {
            write!(f, "  {} {}", node.kind.label(), node.name)?;
            match &node.kind {
                NodeKind::Source { topics } => write!(f, " (topics: [{}])", topics.join(", "))?,
                NodeKind::Sink { topic } => write!(f, " (topic: {})", topic)?,
                NodeKind::Processor { .. } => {}
            }
            if !node.children.is_empty() {
                let children: Vec<&str> = node
                    .children
                    .iter()
                    .map(|id| self.node(*id).name())
                    .collect();
                write!(f, " --> {}", children.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
