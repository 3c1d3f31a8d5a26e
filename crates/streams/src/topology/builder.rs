//! Two-phase topology construction
//!
//! Nodes are registered on a mutable [`TopologyBuilder`]; parent names are
//! only resolved by [`TopologyBuilder::build`], which validates the whole
//! graph and either returns an immutable [`Topology`] or the first violated
//! invariant. `build` consumes the builder, so nothing can be registered
//! after the graph is frozen.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use super::node::{Node, NodeId, NodeKind, ProcessorFactory};
use super::Topology;
use crate::error::{Result, TopologyError};
use crate::processor::Processor;

/// A node as declared, before parent names are resolved
struct Declared {
    name: String,
    kind: NodeKind,
    parents: Vec<String>,
}

/// Mutable builder for a [`Topology`]
///
/// ```
/// use wks_streams::{Processor, ProcessorContext, Result, TopologyBuilder};
///
/// struct Upper;
///
/// impl Processor for Upper {
///     fn process(&mut self, key: Option<&[u8]>, value: &[u8], ctx: &mut ProcessorContext<'_>) -> Result<()> {
///         ctx.forward(key, &value.to_ascii_uppercase())
///     }
/// }
///
/// let topology = TopologyBuilder::new()
///     .source("input", ["text"])
///     .processor("upper", || Upper, &["input"])
///     .sink("output", "text-upper", &["upper"])
///     .build()
///     .unwrap();
///
/// assert_eq!(topology.len(), 3);
/// ```
#[derive(Default)]
pub struct TopologyBuilder {
    declared: Vec<Declared>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source reading from `topics`
    #[must_use]
    pub fn source<I, S>(mut self, name: impl Into<String>, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared.push(Declared {
            name: name.into(),
            kind: NodeKind::Source {
                topics: topics.into_iter().map(Into::into).collect(),
            },
            parents: Vec::new(),
        });
        self
    }

    /// Register a processor fed by `parents`
    ///
    /// `factory` is called once per task, so each task owns its own state.
    #[must_use]
    pub fn processor<F, P>(mut self, name: impl Into<String>, factory: F, parents: &[&str]) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
        P: Processor + 'static,
    {
        let factory: ProcessorFactory = Arc::new(move || Box::new(factory()) as Box<dyn Processor>);
        self.declared.push(Declared {
            name: name.into(),
            kind: NodeKind::Processor { factory },
            parents: parents.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// Register a sink writing to `topic`
    #[must_use]
    pub fn sink(mut self, name: impl Into<String>, topic: impl Into<String>, parents: &[&str]) -> Self {
        self.declared.push(Declared {
            name: name.into(),
            kind: NodeKind::Sink {
                topic: topic.into(),
            },
            parents: parents.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// Validate the declared graph and freeze it
    ///
    /// # Errors
    ///
    /// Returns [`crate::StreamsError::TopologyValidation`] naming the first
    /// violated invariant; no partial topology is produced.
    pub fn build(self) -> Result<Topology> {
        if self.declared.is_empty() {
            return Err(TopologyError::Empty.into());
        }

        let name_index = index_names(&self.declared)?;
        let topic_index = index_topics(&self.declared)?;
        let sinks: Vec<bool> = self
            .declared
            .iter()
            .map(|d| matches!(d.kind, NodeKind::Sink { .. }))
            .collect();

        let mut nodes: Vec<Node> = Vec::with_capacity(self.declared.len());
        for (idx, declared) in self.declared.into_iter().enumerate() {
            let parents = resolve_parents(&declared, &name_index, &sinks)?;
            nodes.push(Node {
                id: NodeId(idx as u32),
                name: declared.name,
                kind: declared.kind,
                parents,
                children: Vec::new(),
            });
        }

        // children follow the registration order of the child nodes
        for idx in 0..nodes.len() {
            let child = nodes[idx].id;
            for parent in nodes[idx].parents.clone() {
                nodes[parent.index()].children.push(child);
            }
        }

        check_acyclic(&nodes)?;

        debug!(
            nodes = nodes.len(),
            topics = topic_index.len(),
            "Topology validated"
        );

        Ok(Topology::new(nodes, name_index, topic_index))
    }
}

/// Resolve declared parent names, dropping repeats
fn resolve_parents(
    declared: &Declared,
    name_index: &HashMap<String, NodeId>,
    sinks: &[bool],
) -> Result<Vec<NodeId>> {
    if matches!(declared.kind, NodeKind::Source { .. }) {
        return Ok(Vec::new());
    }
    if declared.parents.is_empty() {
        return Err(TopologyError::MissingParent(declared.name.clone()).into());
    }

    let mut parents = Vec::with_capacity(declared.parents.len());
    for parent in &declared.parents {
        let id = *name_index
            .get(parent)
            .ok_or_else(|| TopologyError::UnknownParent {
                node: declared.name.clone(),
                parent: parent.clone(),
            })?;
        if sinks[id.index()] {
            return Err(TopologyError::SinkAsParent {
                node: declared.name.clone(),
                parent: parent.clone(),
            }
            .into());
        }
        if !parents.contains(&id) {
            parents.push(id);
        }
    }
    Ok(parents)
}

/// Kahn's algorithm; any node left unvisited sits on a cycle
fn check_acyclic(nodes: &[Node]) -> Result<()> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.parents.len()).collect();
    let mut queue: VecDeque<NodeId> = nodes
        .iter()
        .filter(|n| n.parents.is_empty())
        .map(|n| n.id)
        .collect();

    let mut visited = HashSet::with_capacity(nodes.len());
    while let Some(id) = queue.pop_front() {
        visited.insert(id);
        for &child in &nodes[id.index()].children {
            in_degree[child.index()] -= 1;
            if in_degree[child.index()] == 0 {
                queue.push_back(child);
            }
        }
    }

    if visited.len() < nodes.len() {
        let stuck = nodes
            .iter()
            .filter(|n| !visited.contains(&n.id))
            .map(|n| n.name.clone())
            .collect();
        return Err(TopologyError::CycleDetected(stuck).into());
    }
    Ok(())
}

fn index_names(declared: &[Declared]) -> Result<HashMap<String, NodeId>> {
    let mut index = HashMap::with_capacity(declared.len());
    for (idx, node) in declared.iter().enumerate() {
        if node.name.trim().is_empty() {
            return Err(TopologyError::InvalidNode {
                node: node.name.clone(),
                reason: "node name must not be empty".to_string(),
            }
            .into());
        }
        if index.insert(node.name.clone(), NodeId(idx as u32)).is_some() {
            return Err(TopologyError::DuplicateName(node.name.clone()).into());
        }
    }
    Ok(index)
}

fn index_topics(declared: &[Declared]) -> Result<HashMap<String, NodeId>> {
    let mut index: HashMap<String, NodeId> = HashMap::new();
    for (idx, node) in declared.iter().enumerate() {
        match &node.kind {
            NodeKind::Source { topics } => {
                if topics.is_empty() {
                    return Err(TopologyError::SourceWithoutTopics(node.name.clone()).into());
                }
                for topic in topics {
                    if topic.trim().is_empty() {
                        return Err(TopologyError::InvalidNode {
                            node: node.name.clone(),
                            reason: "input topic must not be empty".to_string(),
                        }
                        .into());
                    }
                    if let Some(first) = index.get(topic) {
                        if first.index() == idx {
                            continue;
                        }
                        return Err(TopologyError::DuplicateTopic {
                            topic: topic.clone(),
                            first: declared[first.index()].name.clone(),
                            second: node.name.clone(),
                        }
                        .into());
                    }
                    index.insert(topic.clone(), NodeId(idx as u32));
                }
            }
            NodeKind::Sink { topic } if topic.trim().is_empty() => {
                return Err(TopologyError::InvalidNode {
                    node: node.name.clone(),
                    reason: "output topic must not be empty".to_string(),
                }
                .into());
            }
            _ => {}
        }
    }
    Ok(index)
}
