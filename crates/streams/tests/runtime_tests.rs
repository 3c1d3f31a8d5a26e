//! Runtime lifecycle: start, drain on shutdown, close

mod common;

use common::{fast_config, record, EventLog};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use wks_streams::{
    MemoryClientSupplier, MemoryInputClient, MemoryOutputClient, Processor, ProcessorContext, Result,
    RuntimeState, ShutdownHandle, StreamsConfig, StreamsError, StreamsRuntime, TopicPartition,
    Topology, TopologyBuilder,
};

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Filled with the runtime's handle once the runtime exists
type ShutdownSlot = Arc<OnceLock<ShutdownHandle>>;

/// Requests shutdown when it sees the given offset
struct StopAt {
    offset: i64,
    shutdown: Option<ShutdownHandle>,
    log: EventLog,
}

impl Processor for StopAt {
    fn process(&mut self, key: Option<&[u8]>, value: &[u8], ctx: &mut ProcessorContext<'_>) -> Result<()> {
        let offset = ctx.offset().unwrap_or(-1);
        self.log.push(format!("process:{offset}"));
        if offset == self.offset {
            if let Some(shutdown) = &self.shutdown {
                shutdown.shutdown();
            }
        }
        ctx.forward(key, value)
    }

    fn close(&mut self) -> Result<()> {
        self.log.push("close");
        Ok(())
    }
}

struct Failing;

impl Processor for Failing {
    fn process(&mut self, _key: Option<&[u8]>, _value: &[u8], _ctx: &mut ProcessorContext<'_>) -> Result<()> {
        Err(anyhow::anyhow!("downstream rejected the record").into())
    }
}

fn config(num_tasks: usize) -> StreamsConfig {
    let mut config = StreamsConfig::new("wks-runtime-test");
    config.runtime = fast_config();
    config.runtime.num_tasks = num_tasks;
    config
}

fn stop_at_topology(offset: i64, slot: &ShutdownSlot, log: &EventLog) -> Topology {
    let slot = Arc::clone(slot);
    let log = log.clone();
    TopologyBuilder::new()
        .source("in", ["input"])
        .processor(
            "stop",
            move || StopAt {
                offset,
                shutdown: slot.get().cloned(),
                log: log.clone(),
            },
            &["in"],
        )
        .sink("out", "output", &["stop"])
        .build()
        .unwrap()
}

async fn wait_until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_shutdown_mid_batch_drains_and_commits_the_batch() {
    let log = EventLog::default();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch((0..5).map(|o| record("input", 0, o, "k", "v", o)).collect());
    input.push_batch(vec![record("input", 0, 5, "k", "v", 5)]);

    let supplier = MemoryClientSupplier::new(vec![input.clone()], output.clone());
    let slot = ShutdownSlot::default();
    let mut runtime =
        StreamsRuntime::new(stop_at_topology(1, &slot, &log), config(1), supplier).unwrap();
    // processors are created on start, after the slot is filled
    slot.set(runtime.shutdown_handle()).unwrap();

    tokio::time::timeout(TEST_TIMEOUT, runtime.run_until(std::future::pending()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(
        log.matching("process:"),
        vec!["process:0", "process:1", "process:2", "process:3", "process:4"]
    );
    assert_eq!(log.matching("close"), vec!["close"]);

    let expected: BTreeMap<TopicPartition, i64> = [(TopicPartition::new("input", 0), 4)].into();
    assert_eq!(input.committed(), expected);
    assert_eq!(input.pending_polls(), 1);
    assert!(input.is_closed());

    assert_eq!(output.sent_to("output").len(), 5);
    assert_eq!(output.flushes(), 1);
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn test_each_task_owns_its_input_client() {
    let log = EventLog::default();
    let first = MemoryInputClient::new();
    let second = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    first.push_batch(vec![record("input", 0, 0, "k", "a", 1)]);
    second.push_batch(vec![
        record("input", 1, 0, "k", "b", 1),
        record("input", 1, 1, "k", "c", 2),
    ]);

    let supplier = MemoryClientSupplier::new(vec![first.clone(), second.clone()], output.clone());
    let mut runtime =
        StreamsRuntime::new(stop_at_topology(-1, &ShutdownSlot::default(), &log), config(2), supplier).unwrap();

    runtime.start().await.unwrap();
    assert_eq!(runtime.state(), RuntimeState::Running);
    tokio::time::timeout(
        TEST_TIMEOUT,
        wait_until(|| !first.committed().is_empty() && !second.committed().is_empty()),
    )
    .await
    .unwrap();
    runtime.close().await.unwrap();

    assert_eq!(first.subscriptions(), vec!["input"]);
    assert_eq!(second.subscriptions(), vec!["input"]);
    assert_eq!(first.committed().get(&TopicPartition::new("input", 0)), Some(&0));
    assert_eq!(second.committed().get(&TopicPartition::new("input", 1)), Some(&1));

    let stats = runtime.stats().await;
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].task_id, 0);
    assert_eq!(stats[0].records_processed, 1);
    assert_eq!(stats[1].records_processed, 2);
    assert_eq!(log.matching("close").len(), 2);
    assert_eq!(output.sent().len(), 3);
}

#[tokio::test]
async fn test_task_failure_stops_the_runtime_and_is_reported() {
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch(vec![record("input", 0, 0, "k", "a", 1)]);

    let topology = TopologyBuilder::new()
        .source("in", ["input"])
        .processor("failing", || Failing, &["in"])
        .build()
        .unwrap();
    let supplier = MemoryClientSupplier::new(vec![input.clone()], output.clone());
    let mut runtime = StreamsRuntime::new(topology, config(1), supplier).unwrap();

    let err = tokio::time::timeout(TEST_TIMEOUT, runtime.run_until(std::future::pending()))
        .await
        .unwrap()
        .unwrap_err();

    assert!(matches!(err, StreamsError::ProcessorRuntime { .. }));
    assert_eq!(err.node(), Some("failing"));
    assert!(input.commits().is_empty());
    assert!(input.is_closed());
    assert_eq!(runtime.state(), RuntimeState::Stopped);
}

#[tokio::test]
async fn test_runtime_can_restart_after_close() {
    let log = EventLog::default();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch(vec![record("input", 0, 0, "k", "a", 1)]);

    let supplier = MemoryClientSupplier::new(vec![input.clone()], output.clone());
    let mut runtime =
        StreamsRuntime::new(stop_at_topology(-1, &ShutdownSlot::default(), &log), config(1), supplier).unwrap();

    runtime.start().await.unwrap();
    tokio::time::timeout(TEST_TIMEOUT, wait_until(|| !input.committed().is_empty()))
        .await
        .unwrap();
    runtime.close().await.unwrap();

    input.push_batch(vec![record("input", 0, 1, "k", "b", 2)]);
    runtime.start().await.unwrap();
    tokio::time::timeout(
        TEST_TIMEOUT,
        wait_until(|| input.committed().get(&TopicPartition::new("input", 0)) == Some(&1)),
    )
    .await
    .unwrap();
    runtime.close().await.unwrap();

    assert_eq!(log.matching("process:"), vec!["process:0", "process:1"]);
    assert_eq!(log.matching("close").len(), 2);
    assert_eq!(output.flushes(), 2);
}
