//! User processor contract
//!
//! A processor instance is created per task by its node's factory and moves
//! through `initialise`, any number of `process`/`punctuate` calls, and
//! finally `close`. Callbacks of one task never overlap, so processor state
//! needs no locking.

use crate::context::ProcessorContext;
use crate::error::Result;

/// Stateful node logic
///
/// Every callback that may emit records receives the node's
/// [`ProcessorContext`]; forwarding through it runs the downstream nodes to
/// completion before the call returns.
pub trait Processor: Send {
    /// Called once per task before any record is processed
    ///
    /// The usual place to call [`ProcessorContext::schedule`].
    fn initialise(&mut self, _name: &str, _ctx: &mut ProcessorContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once for every record delivered to this node
    fn process(&mut self, key: Option<&[u8]>, value: &[u8], ctx: &mut ProcessorContext<'_>) -> Result<()>;

    /// Called by the engine when stream time reaches the next due time
    fn punctuate(&mut self, _timestamp: i64, _ctx: &mut ProcessorContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once when the owning task shuts down, even after a failure
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
