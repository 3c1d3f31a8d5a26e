//! Shared helpers for the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use wks_streams::{
    InputRecord, MemoryInputClient, MemoryOutputClient, Result, RuntimeConfig, ShutdownHandle,
    StreamTask, TaskStats, Topology,
};

/// Runtime settings that keep tests fast
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_timeout_ms: 5,
        poll_backoff_ms: 1,
        poll_max_backoff_ms: 5,
        commit_backoff_ms: 1,
        sink_backoff_ms: 1,
        commit_interval_ms: 0,
        ..RuntimeConfig::default()
    }
}

pub fn record(topic: &str, partition: i32, offset: i64, key: &str, value: &str, timestamp: i64) -> InputRecord {
    InputRecord::new(
        topic,
        partition,
        offset,
        Some(key.as_bytes().to_vec()),
        value.as_bytes().to_vec(),
        timestamp,
    )
}

/// Ordered log of callbacks shared between processors and assertions
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// Run one task until every scripted poll has been consumed and handled
pub async fn run_task(
    topology: Topology,
    input: &MemoryInputClient,
    output: &MemoryOutputClient,
    config: RuntimeConfig,
) -> Result<TaskStats> {
    let shutdown = ShutdownHandle::new();
    let task = StreamTask::new(
        0,
        Arc::new(topology),
        Box::new(input.clone()),
        Arc::new(output.clone()),
        config,
        shutdown.clone(),
    );
    let handle = tokio::spawn(task.run());

    // shutdown is honoured between cycles, so the last batch still completes
    while input.pending_polls() > 0 && !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    shutdown.shutdown();

    handle.await.expect("task panicked")
}
