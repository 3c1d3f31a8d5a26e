//! Task runner: the poll, dispatch, punctuate, commit loop
//!
//! A task owns one input client, its own processor instances, punctuation
//! schedule and offset cursor. Each cycle:
//!
//! 1. polls a batch (transient failures are retried with backoff),
//! 2. dispatches every record to completion, in poll order,
//! 3. fires due punctuations,
//! 4. sends the sink writes the batch produced,
//! 5. commits the offsets of the records it completed.
//!
//! Shutdown is only observed between cycles, so a batch that started is
//! always dispatched, punctuated and committed before the task exits.

mod collector;
mod cursor;
pub(crate) mod dispatch;
mod stats;

pub use collector::{FlushSummary, PendingWrite, RecordCollector};
pub use cursor::OffsetCursor;
pub use stats::TaskStats;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use wks_config::RuntimeConfig;

use crate::client::{ClientError, InputClient, OutputClient};
use crate::error::{Result, StreamsError};
use crate::record::InputRecord;
use crate::runtime::ShutdownHandle;
use crate::topology::Topology;
use dispatch::Dispatcher;

/// Ceiling for the delay between commit attempts
const MAX_COMMIT_BACKOFF_MS: u64 = 30_000;

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max_ms`
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// One independent execution unit of a topology
pub struct StreamTask {
    id: usize,
    dispatcher: Dispatcher,
    input: Box<dyn InputClient>,
    output: Arc<dyn OutputClient>,
    config: RuntimeConfig,
    shutdown: ShutdownHandle,
    cursor: OffsetCursor,
    stats: TaskStats,
    published: Arc<RwLock<TaskStats>>,
    last_commit: Instant,
}

impl StreamTask {
    pub fn new(
        id: usize,
        topology: Arc<Topology>,
        input: Box<dyn InputClient>,
        output: Arc<dyn OutputClient>,
        config: RuntimeConfig,
        shutdown: ShutdownHandle,
    ) -> Self {
        let collector = RecordCollector::new(config.sink_max_retries, config.sink_backoff_ms);
        Self {
            id,
            dispatcher: Dispatcher::new(id, topology, collector),
            input,
            output,
            config,
            shutdown,
            cursor: OffsetCursor::new(),
            stats: TaskStats::new(id),
            published: Arc::new(RwLock::new(TaskStats::new(id))),
            last_commit: Instant::now(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Shared view of this task's statistics
    pub fn stats_handle(&self) -> Arc<RwLock<TaskStats>> {
        Arc::clone(&self.published)
    }

    /// Run until shutdown or a fatal error
    ///
    /// Processors and the input client are closed on every exit path.
    pub async fn run(mut self) -> Result<TaskStats> {
        info!(task = self.id, "Starting stream task");

        let result = self.run_loop().await;
        let closed = self.close().await;
        self.publish().await;

        match (result, closed) {
            (Err(err), _) => {
                error!(task = self.id, error = %err, "Stream task failed");
                Err(err)
            }
            (Ok(()), Err(err)) => {
                error!(task = self.id, error = %err, "Stream task failed to close");
                Err(err)
            }
            (Ok(()), Ok(())) => {
                info!(
                    task = self.id,
                    records = self.stats.records_processed,
                    commits = self.stats.commits,
                    "Stream task stopped"
                );
                Ok(self.stats)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        let topics = self.dispatcher.topology.input_topics();
        self.input.subscribe(&topics).await?;
        debug!(task = self.id, ?topics, "Subscribed to input topics");

        self.dispatcher.initialise()?;

        while !self.shutdown.is_shutdown() {
            let Some(batch) = self.poll().await? else {
                break;
            };
            self.run_cycle(batch).await?;
        }

        // progress left by a longer commit interval
        self.commit().await?;
        Ok(())
    }

    /// Dispatch, punctuate, flush and commit one polled batch
    async fn run_cycle(&mut self, batch: Vec<InputRecord>) -> Result<()> {
        if !batch.is_empty() {
            self.stats.batches += 1;
            debug!(task = self.id, records = batch.len(), "Dispatching batch");
        }

        for record in &batch {
            self.dispatcher.dispatch(record)?;
            self.cursor.advance(record.topic_partition(), record.offset);
            self.stats.records_processed += 1;
        }

        self.stats.punctuations += self.dispatcher.punctuate()?;

        let flushed = self.dispatcher.collector.flush(self.output.as_ref()).await?;
        self.stats.records_sent += flushed.sent;
        self.stats.sink_retries += flushed.retries;

        if self.last_commit.elapsed() >= self.config.commit_interval() {
            self.commit().await?;
        }

        self.publish().await;
        Ok(())
    }

    /// Poll one batch, retrying transient failures until shutdown
    ///
    /// Returns `None` when shutdown was requested while backing off.
    async fn poll(&mut self) -> Result<Option<Vec<InputRecord>>> {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .input
                .poll(self.config.poll_timeout(), self.config.max_poll_records)
                .await
                .map_err(classify_poll_error);

            match result {
                Ok(batch) => return Ok(Some(batch)),
                Err(err) if err.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    self.stats.poll_retries += 1;
                    let delay = backoff_delay(
                        self.config.poll_backoff_ms,
                        attempt,
                        self.config.poll_max_backoff_ms,
                    );
                    warn!(task = self.id, attempt, ?delay, error = %err, "Poll failed, retrying");

                    if self.shutdown.is_shutdown() {
                        return Ok(None);
                    }
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Commit the cursor, retrying transient failures
    ///
    /// The loop does not poll again until this succeeds or gives up.
    async fn commit(&mut self) -> Result<()> {
        if self.cursor.is_empty() {
            self.last_commit = Instant::now();
            return Ok(());
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.input.commit(self.cursor.pending()).await {
                Ok(()) => {
                    debug!(task = self.id, offsets = ?self.cursor.pending(), "Committed offsets");
                    self.cursor.clear();
                    self.stats.inc_commits();
                    self.last_commit = Instant::now();
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempts <= self.config.commit_max_retries => {
                    self.stats.commit_retries += 1;
                    let delay = backoff_delay(self.config.commit_backoff_ms, attempts, MAX_COMMIT_BACKOFF_MS);
                    warn!(task = self.id, attempt = attempts, ?delay, error = %err, "Commit failed, retrying");
                    sleep(delay).await;
                }
                Err(err) => {
                    return Err(StreamsError::CommitFailure {
                        attempts,
                        source: err,
                    })
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.dispatcher.close();
        if let Err(err) = self.input.close().await {
            warn!(task = self.id, error = %err, "Failed to close input client");
        }
        closed
    }

    async fn publish(&mut self) {
        self.stats.records_forwarded = self.dispatcher.forwarded;
        self.stats.stream_time = self.dispatcher.stream_time.current();
        *self.published.write().await = self.stats.clone();
    }
}

fn classify_poll_error(err: ClientError) -> StreamsError {
    if err.is_transient() {
        StreamsError::PollTransient(err)
    } else {
        StreamsError::Client(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(backoff_delay(100, 1, 10_000), Duration::from_millis(100));
        assert_eq!(backoff_delay(100, 2, 10_000), Duration::from_millis(200));
        assert_eq!(backoff_delay(100, 4, 10_000), Duration::from_millis(800));
        assert_eq!(backoff_delay(100, 30, 10_000), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(0, 5, 10_000), Duration::ZERO);
    }

    #[test]
    fn test_poll_error_classification() {
        assert!(classify_poll_error(ClientError::transient("timeout")).is_retryable());
        assert!(matches!(
            classify_poll_error(ClientError::fatal("no such topic")),
            StreamsError::Client(_)
        ));
    }
}
