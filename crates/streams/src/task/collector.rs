//! Sink writes of the current batch
//!
//! Sink nodes are reached inside synchronous dispatch, so their writes are
//! queued here in dispatch order and sent once the batch has been dispatched
//! and punctuated. The task only commits after a successful flush.

use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::backoff_delay;
use crate::client::OutputClient;
use crate::error::{Result, StreamsError};
use crate::record::Origin;

/// Ceiling for the delay between write attempts
const MAX_SINK_BACKOFF_MS: u64 = 60_000;

/// One queued write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub sink: String,
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub origin: Origin,
}

/// Outcome of a successful flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushSummary {
    pub sent: u64,
    pub retries: u64,
}

#[derive(Debug)]
pub struct RecordCollector {
    pending: Vec<PendingWrite>,
    max_retries: u32,
    base_backoff_ms: u64,
}

impl RecordCollector {
    pub fn new(max_retries: u32, base_backoff_ms: u64) -> Self {
        Self {
            pending: Vec::new(),
            max_retries,
            base_backoff_ms,
        }
    }

    pub fn push(&mut self, write: PendingWrite) {
        self.pending.push(write);
    }

    pub fn pending(&self) -> &[PendingWrite] {
        &self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Send every queued write in order
    ///
    /// Transient failures are retried with exponential backoff up to the
    /// configured limit; a fatal failure or exhausted retries stop the flush
    /// with [`StreamsError::SinkWrite`].
    pub async fn flush(&mut self, output: &dyn OutputClient) -> Result<FlushSummary> {
        let mut summary = FlushSummary::default();

        for write in self.pending.drain(..) {
            let mut attempts: u32 = 0;
            loop {
                attempts += 1;
                match output
                    .send(&write.topic, write.key.as_deref(), &write.value)
                    .await
                {
                    Ok(()) => {
                        summary.sent += 1;
                        break;
                    }
                    Err(err) if err.is_transient() && attempts <= self.max_retries => {
                        summary.retries += 1;
                        let delay = backoff_delay(self.base_backoff_ms, attempts, MAX_SINK_BACKOFF_MS);
                        warn!(
                            sink = %write.sink,
                            topic = %write.topic,
                            attempt = attempts,
                            max_retries = self.max_retries,
                            ?delay,
                            error = %err,
                            "Sink write failed, retrying"
                        );
                        sleep(delay).await;
                    }
                    Err(err) => {
                        error!(
                            sink = %write.sink,
                            topic = %write.topic,
                            attempts,
                            error = %err,
                            "Sink write failed"
                        );
                        return Err(StreamsError::SinkWrite {
                            node: write.sink,
                            topic: write.topic,
                            origin: write.origin,
                            attempts,
                            source: err,
                        });
                    }
                }
            }
        }

        if summary.sent > 0 {
            debug!(sent = summary.sent, retries = summary.retries, "Flushed sink writes");
        }
        Ok(summary)
    }
}
