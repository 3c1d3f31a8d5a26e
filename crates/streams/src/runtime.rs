//! Process-wide lifecycle of a topology
//!
//! [`StreamsRuntime`] turns a validated topology plus configuration into
//! running tasks. `start` spawns one task per configured slot; `close`
//! drains them, flushes the shared output client and reports the first
//! fatal task error.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wks_config::StreamsConfig;

use crate::client::{ClientSupplier, OutputClient};
use crate::error::{Result, StreamsError};
use crate::task::{StreamTask, TaskStats};
use crate::topology::Topology;

/// How often `run_until` checks for tasks that stopped on their own
const TASK_WATCH_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle state of a runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Stopped,
    Running,
    Stopping,
}

/// Cooperative stop signal shared with every task
///
/// Tasks check it between cycles, so requesting shutdown lets the batch in
/// flight finish and commit. It can be triggered from any thread, including
/// from inside a processor callback.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs a topology against the clients of a [`ClientSupplier`]
pub struct StreamsRuntime {
    topology: Arc<Topology>,
    config: StreamsConfig,
    supplier: Arc<dyn ClientSupplier>,
    state: RuntimeState,
    shutdown: ShutdownHandle,
    tasks: Vec<JoinHandle<Result<TaskStats>>>,
    stats: Vec<Arc<RwLock<TaskStats>>>,
    output: Option<Arc<dyn OutputClient>>,
}

impl StreamsRuntime {
    /// Create a stopped runtime
    ///
    /// The configuration is validated here and not consulted again after
    /// construction.
    pub fn new<S>(topology: Topology, config: StreamsConfig, supplier: S) -> Result<Self>
    where
        S: ClientSupplier + 'static,
    {
        config.validate()?;
        Ok(Self {
            topology: Arc::new(topology),
            config,
            supplier: Arc::new(supplier),
            state: RuntimeState::Stopped,
            shutdown: ShutdownHandle::new(),
            tasks: Vec::new(),
            stats: Vec::new(),
            output: None,
        })
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &StreamsConfig {
        &self.config
    }

    /// Signal that asks every task to stop after its current batch
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Spawn the tasks; a no-op unless the runtime is stopped
    pub async fn start(&mut self) -> Result<()> {
        if self.state != RuntimeState::Stopped {
            debug!(state = ?self.state, "Runtime already started");
            return Ok(());
        }

        info!(
            application_id = %self.config.application_id,
            tasks = self.config.runtime.num_tasks,
            "Starting streams runtime"
        );
        debug!(topology = %self.topology, "Running topology");

        let output = self.supplier.output_client()?;
        let mut inputs = Vec::with_capacity(self.config.runtime.num_tasks);
        for task_id in 0..self.config.runtime.num_tasks {
            inputs.push(self.supplier.input_client(task_id)?);
        }

        self.shutdown.reset();
        self.stats.clear();
        for (task_id, input) in inputs.into_iter().enumerate() {
            let task = StreamTask::new(
                task_id,
                Arc::clone(&self.topology),
                input,
                Arc::clone(&output),
                self.config.runtime.clone(),
                self.shutdown.clone(),
            );
            self.stats.push(task.stats_handle());
            self.tasks.push(tokio::spawn(task.run()));
        }

        self.output = Some(output);
        self.state = RuntimeState::Running;
        Ok(())
    }

    /// Drain every task, flush the output client and stop
    ///
    /// A no-op when already stopped. Returns the first fatal task error.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == RuntimeState::Stopped {
            debug!("Runtime already stopped");
            return Ok(());
        }

        info!("Stopping streams runtime");
        self.state = RuntimeState::Stopping;
        self.shutdown.shutdown();

        let mut first_error: Option<StreamsError> = None;
        for (task_id, handle) in self.tasks.drain(..).enumerate() {
            match handle.await {
                Ok(Ok(stats)) => {
                    debug!(task = task_id, records = stats.records_processed, "Task drained");
                }
                Ok(Err(err)) => {
                    error!(task = task_id, error = %err, "Task ended with an error");
                    first_error.get_or_insert(err);
                }
                Err(join_err) => {
                    error!(task = task_id, error = %join_err, "Task did not complete");
                    first_error.get_or_insert(StreamsError::Lifecycle(format!(
                        "task {} did not complete: {}",
                        task_id, join_err
                    )));
                }
            }
        }

        if let Some(output) = self.output.take() {
            if let Err(err) = output.flush(self.config.runtime.flush_timeout()).await {
                warn!(error = %err, "Failed to flush output client");
                first_error.get_or_insert(StreamsError::Client(err));
            }
        }

        self.state = RuntimeState::Stopped;
        info!("Streams runtime stopped");

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Start, wait for `signal` or a task that stops on its own, then close
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        tokio::select! {
            _ = signal => info!("Shutdown signal received"),
            _ = self.wait_for_task_exit() => warn!("A task stopped, shutting down"),
        }

        self.close().await
    }

    /// Latest statistics of every task
    pub async fn stats(&self) -> Vec<TaskStats> {
        let mut snapshots = Vec::with_capacity(self.stats.len());
        for handle in &self.stats {
            snapshots.push(handle.read().await.clone());
        }
        snapshots
    }

    async fn wait_for_task_exit(&self) {
        let mut ticker = tokio::time::interval(TASK_WATCH_INTERVAL);
        loop {
            ticker.tick().await;
            if self.tasks.iter().any(JoinHandle::is_finished) {
                return;
            }
        }
    }
}

impl Drop for StreamsRuntime {
    fn drop(&mut self) {
        if self.state != RuntimeState::Stopped {
            // tasks still stop at their next cycle boundary
            self.shutdown.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClientSupplier;
    use crate::context::ProcessorContext;
    use crate::processor::Processor;

    struct Noop;

    impl Processor for Noop {
        fn process(&mut self, _key: Option<&[u8]>, _value: &[u8], _ctx: &mut ProcessorContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn topology() -> Topology {
        Topology::builder()
            .source("in", ["input"])
            .processor("noop", || Noop, &["in"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_shutdown_handle_is_shared() {
        let handle = ShutdownHandle::new();
        let clone = handle.clone();
        clone.shutdown();
        assert!(handle.is_shutdown());
        handle.reset();
        assert!(!clone.is_shutdown());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StreamsConfig::new("app");
        config.runtime.num_tasks = 0;
        let result = StreamsRuntime::new(topology(), config, MemoryClientSupplier::default());
        assert!(matches!(result, Err(StreamsError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_start_and_close_are_idempotent() {
        let mut runtime =
            StreamsRuntime::new(topology(), StreamsConfig::new("app"), MemoryClientSupplier::default()).unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        runtime.close().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);

        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(runtime.stats().await.len(), 1);

        runtime.close().await.unwrap();
        runtime.close().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_run_until_signal() {
        let mut runtime =
            StreamsRuntime::new(topology(), StreamsConfig::new("app"), MemoryClientSupplier::default()).unwrap();

        runtime
            .run_until(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
    }
}
