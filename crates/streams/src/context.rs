//! Handle given to a processor for one callback
//!
//! A context is bound to a single node: `forward` reaches that node's
//! children only, and `schedule` registers that node's punctuation. Record
//! metadata describes the input record being dispatched, or is absent while
//! initialising and punctuating.

use std::time::Duration;
use tracing::debug;

use crate::error::{Result, StreamsError};
use crate::punctuation::PunctuationScheduler;
use crate::record::{Origin, RecordContext};
use crate::task::dispatch::Dispatcher;
use crate::topology::NodeId;

pub struct ProcessorContext<'a> {
    node: NodeId,
    dispatcher: &'a mut Dispatcher,
}

impl<'a> ProcessorContext<'a> {
    pub(crate) fn new(node: NodeId, dispatcher: &'a mut Dispatcher) -> Self {
        Self { node, dispatcher }
    }

    /// Name of the node this context is bound to
    pub fn name(&self) -> &str {
        self.dispatcher.topology.node(self.node).name()
    }

    /// Index of the owning task
    pub fn task_id(&self) -> usize {
        self.dispatcher.task_id
    }

    /// Send a record to every child, in declaration order
    ///
    /// Each child (and everything below it) finishes before this returns.
    /// Forwarding from `initialise` is a processor error, since children
    /// may not be initialised yet.
    pub fn forward(&mut self, key: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.dispatcher.forward(self.node, None, key, value)
    }

    /// Send a record to one named child
    ///
    /// Naming a node that is not a child of this node is a processor error.
    pub fn forward_to(&mut self, child: &str, key: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.dispatcher.forward(self.node, Some(child), key, value)
    }

    /// Request `punctuate` every `interval` of stream time
    ///
    /// A later call replaces the interval and restarts the schedule from the
    /// current stream time. Intervals below one millisecond are rejected.
    ///
    /// Missed intervals are caught up one by one: when stream time jumps by
    /// `n * interval`, `punctuate` runs `n` times before the next poll. With
    /// epoch-millisecond timestamps, a short interval combined with a large
    /// gap in the input (or a first record far ahead of the rest) can keep
    /// the task punctuating for a long time, so pick intervals that match
    /// the expected spacing of the data.
    pub fn schedule(&mut self, interval: Duration) -> Result<()> {
        let Some(millis) = PunctuationScheduler::interval_millis(interval) else {
            return Err(StreamsError::InvalidSchedule {
                node: self.name().to_string(),
                interval,
            });
        };

        let now = self.dispatcher.stream_time.current();
        debug!(
            task = self.dispatcher.task_id,
            node = self.name(),
            interval_ms = millis,
            stream_time = ?now,
            "Scheduling punctuation"
        );
        self.dispatcher.scheduler.schedule(self.node, millis, now);
        Ok(())
    }

    /// Timestamp of the current record, or the punctuation time
    pub fn timestamp(&self) -> i64 {
        self.dispatcher.timestamp
    }

    /// Current stream time, `None` before the first record
    pub fn stream_time(&self) -> Option<i64> {
        self.dispatcher.stream_time.current()
    }

    /// Metadata of the input record being dispatched
    pub fn record(&self) -> Option<&RecordContext> {
        match &self.dispatcher.origin {
            Origin::Record(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.record().map(|ctx| ctx.topic.as_str())
    }

    pub fn partition(&self) -> Option<i32> {
        self.record().map(|ctx| ctx.partition)
    }

    pub fn offset(&self) -> Option<i64> {
        self.record().map(|ctx| ctx.offset)
    }
}
