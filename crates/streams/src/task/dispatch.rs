//! Synchronous, depth-first dispatch through the topology
//!
//! The dispatcher owns the processor instances of one task. While a
//! processor runs it is taken out of its slot, so the context handed to it
//! can borrow the dispatcher mutably and continue the walk into its
//! children. The graph is acyclic, so a taken slot is never revisited
//! during that walk.
//!
//! A panic inside a processor callback is caught at the callback boundary
//! and reported as a processor error, so the task still closes every
//! processor and its input client.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

use super::collector::{PendingWrite, RecordCollector};
use crate::context::ProcessorContext;
use crate::error::{Result, StreamsError};
use crate::processor::Processor;
use crate::punctuation::{PunctuationScheduler, StreamTime};
use crate::record::{InputRecord, Origin};
use crate::topology::{NodeId, NodeKind, Topology};

pub(crate) struct Dispatcher {
    pub(crate) task_id: usize,
    pub(crate) topology: Arc<Topology>,
    processors: Vec<Option<Box<dyn Processor>>>,
    pub(crate) scheduler: PunctuationScheduler,
    pub(crate) stream_time: StreamTime,
    pub(crate) collector: RecordCollector,
    pub(crate) origin: Origin,
    /// Timestamp carried by records forwarded right now
    pub(crate) timestamp: i64,
    pub(crate) forwarded: u64,
}

impl Dispatcher {
    pub(crate) fn new(task_id: usize, topology: Arc<Topology>, collector: RecordCollector) -> Self {
        let processors = topology
            .nodes()
            .iter()
            .map(|node| match node.kind() {
                NodeKind::Processor { factory } => Some(factory()),
                _ => None,
            })
            .collect();

        Self {
            task_id,
            topology,
            processors,
            scheduler: PunctuationScheduler::new(),
            stream_time: StreamTime::new(),
            collector,
            origin: Origin::Initialise,
            timestamp: 0,
            forwarded: 0,
        }
    }

    /// Initialise every processor in registration order
    pub(crate) fn initialise(&mut self) -> Result<()> {
        self.origin = Origin::Initialise;
        let topology = Arc::clone(&self.topology);
        for node in topology.processors() {
            self.with_processor(node.id(), |processor, ctx| {
                let name = ctx.name().to_string();
                processor.initialise(&name, ctx)
            })?;
        }
        Ok(())
    }

    /// Run one input record through the whole graph
    pub(crate) fn dispatch(&mut self, record: &InputRecord) -> Result<()> {
        let now = self.stream_time.observe(record.timestamp);
        self.scheduler.on_stream_time(now);

        let topology = Arc::clone(&self.topology);
        let Some(source) = topology.source_for_topic(&record.topic) else {
            warn!(
                task = self.task_id,
                topic = %record.topic,
                offset = record.offset,
                "Skipping record from a topic no source is bound to"
            );
            return Ok(());
        };

        self.origin = Origin::Record(record.context());
        self.timestamp = record.timestamp;
        trace!(
            task = self.task_id,
            source = source.name(),
            partition = record.partition,
            offset = record.offset,
            "Dispatching record"
        );

        for &child in source.children() {
            self.deliver(child, record.key.as_deref(), &record.value)?;
        }
        Ok(())
    }

    /// Fire every punctuation due at the current stream time
    pub(crate) fn punctuate(&mut self) -> Result<u64> {
        let Some(now) = self.stream_time.current() else {
            return Ok(0);
        };

        let mut fired = 0;
        while let Some(due) = self.scheduler.pop_due(now) {
            self.origin = Origin::Punctuation {
                timestamp: due.timestamp,
            };
            self.timestamp = due.timestamp;
            trace!(task = self.task_id, node = %due.node, timestamp = due.timestamp, "Punctuating");

            self.with_processor(due.node, |processor, ctx| {
                processor.punctuate(due.timestamp, ctx)
            })?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Forward from `from` to all children, or to the named one
    pub(crate) fn forward(
        &mut self,
        from: NodeId,
        child: Option<&str>,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Result<()> {
        let topology = Arc::clone(&self.topology);
        let node = topology.node(from);

        // children may not be initialised yet
        if matches!(self.origin, Origin::Initialise) {
            return Err(StreamsError::ProcessorRuntime {
                node: node.name().to_string(),
                origin: Origin::Initialise,
                source: "forward is not allowed during initialise".into(),
            });
        }

        match child {
            None => {
                for &target in node.children() {
                    self.deliver(target, key, value)?;
                }
            }
            Some(name) => {
                let target = node
                    .children()
                    .iter()
                    .copied()
                    .find(|id| topology.node(*id).name() == name)
                    .ok_or_else(|| StreamsError::ProcessorRuntime {
                        node: node.name().to_string(),
                        origin: self.origin.clone(),
                        source: format!("'{}' is not a child of '{}'", name, node.name()).into(),
                    })?;
                self.deliver(target, key, value)?;
            }
        }
        Ok(())
    }

    /// Close every processor, returning the first failure
    pub(crate) fn close(&mut self) -> Result<()> {
        self.origin = Origin::Close;
        let mut first_error = None;

        for idx in 0..self.processors.len() {
            let Some(mut processor) = self.processors[idx].take() else {
                continue;
            };
            let name = self.topology.node(NodeId(idx as u32)).name();
            let closed = panic::catch_unwind(AssertUnwindSafe(|| processor.close()))
                .unwrap_or_else(|payload| Err(panic_error(name, &Origin::Close, payload)));
            if let Err(err) = closed {
                warn!(task = self.task_id, node = name, error = %err, "Processor close failed");
                first_error.get_or_insert(err.in_node(name, &Origin::Close));
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn deliver(&mut self, target: NodeId, key: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.forwarded += 1;
        let topology = Arc::clone(&self.topology);
        let node = topology.node(target);

        match node.kind() {
            NodeKind::Processor { .. } => {
                self.with_processor(target, |processor, ctx| processor.process(key, value, ctx))
            }
            NodeKind::Sink { topic } => {
                self.collector.push(PendingWrite {
                    sink: node.name().to_string(),
                    topic: topic.clone(),
                    key: key.map(<[u8]>::to_vec),
                    value: value.to_vec(),
                    origin: self.origin.clone(),
                });
                Ok(())
            }
            // sources have no parents, so nothing forwards into them
            NodeKind::Source { .. } => Ok(()),
        }
    }

    fn with_processor<F>(&mut self, id: NodeId, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Processor, &mut ProcessorContext<'_>) -> Result<()>,
    {
        let topology = Arc::clone(&self.topology);
        let name = topology.node(id).name();

        let mut processor = self.processors[id.index()].take().ok_or_else(|| {
            StreamsError::Lifecycle(format!("processor '{}' is not available", name))
        })?;

        let result = {
            let mut ctx = ProcessorContext::new(id, self);
            panic::catch_unwind(AssertUnwindSafe(|| f(processor.as_mut(), &mut ctx)))
        };
        self.processors[id.index()] = Some(processor);

        match result {
            Ok(result) => result.map_err(|err| err.in_node(name, &self.origin)),
            Err(payload) => {
                error!(task = self.task_id, node = name, origin = %self.origin, "Processor panicked");
                Err(panic_error(name, &self.origin, payload))
            }
        }
    }
}

fn panic_error(node: &str, origin: &Origin, payload: Box<dyn Any + Send>) -> StreamsError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());

    StreamsError::ProcessorRuntime {
        node: node.to_string(),
        origin: origin.clone(),
        source: format!("processor panicked: {}", message).into(),
    }
}
