//! Stream-time punctuation through a running task

mod common;

use common::{fast_config, record, run_task, EventLog};
use std::time::Duration;
use wks_streams::{
    MemoryInputClient, MemoryOutputClient, Origin, Processor, ProcessorContext, Result, StreamsError,
    Topology, TopologyBuilder,
};

/// Schedules itself in `initialise` and logs what it observes
struct Ticker {
    interval: Duration,
    reschedule: Option<Duration>,
    log: EventLog,
}

impl Ticker {
    fn every(millis: u64, log: &EventLog) -> Self {
        Self {
            interval: Duration::from_millis(millis),
            reschedule: None,
            log: log.clone(),
        }
    }
}

impl Processor for Ticker {
    fn initialise(&mut self, _name: &str, ctx: &mut ProcessorContext<'_>) -> Result<()> {
        ctx.schedule(self.interval)
    }

    fn process(&mut self, _key: Option<&[u8]>, _value: &[u8], ctx: &mut ProcessorContext<'_>) -> Result<()> {
        self.log.push(format!(
            "{}:stream-time:{}",
            ctx.name(),
            ctx.stream_time().unwrap_or(-1)
        ));
        if let Some(interval) = self.reschedule.take() {
            ctx.schedule(interval)?;
        }
        Ok(())
    }

    fn punctuate(&mut self, timestamp: i64, ctx: &mut ProcessorContext<'_>) -> Result<()> {
        self.log.push(format!("{}@{}", ctx.name(), timestamp));
        Ok(())
    }
}

fn single_ticker(ticker: impl Fn() -> Ticker + Send + Sync + 'static) -> Topology {
    TopologyBuilder::new()
        .source("in", ["input"])
        .processor("tick", ticker, &["in"])
        .build()
        .unwrap()
}

fn fired(log: &EventLog, node: &str) -> Vec<String> {
    log.matching(&format!("{node}@"))
}

#[tokio::test]
async fn test_stream_time_ignores_late_records_across_partitions() {
    let log = EventLog::default();
    let l = log.clone();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch(vec![
        record("input", 0, 0, "k", "a", 100),
        record("input", 1, 0, "k", "b", 50),
        record("input", 0, 1, "k", "c", 105),
        record("input", 1, 1, "k", "d", 112),
    ]);

    let stats = run_task(single_ticker(move || Ticker::every(10, &l)), &input, &output, fast_config())
        .await
        .unwrap();

    assert_eq!(
        log.matching("tick:stream-time"),
        vec![
            "tick:stream-time:100",
            "tick:stream-time:100",
            "tick:stream-time:105",
            "tick:stream-time:112",
        ]
    );
    assert_eq!(fired(&log, "tick"), vec!["tick@110"]);
    assert_eq!(stats.stream_time, Some(112));
}

#[tokio::test]
async fn test_fires_once_per_interval_regardless_of_batching() {
    let log = EventLog::default();
    let l = log.clone();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch((0..5).map(|o| record("input", 0, o, "k", "v", o)).collect());
    input.push_batch((5..10).map(|o| record("input", 0, o, "k", "v", o)).collect());
    input.push_batch(vec![record("input", 0, 10, "k", "v", 10)]);
    // one large jump covers three intervals
    input.push_batch(vec![record("input", 0, 11, "k", "v", 41)]);

    let stats = run_task(single_ticker(move || Ticker::every(10, &l)), &input, &output, fast_config())
        .await
        .unwrap();

    assert_eq!(fired(&log, "tick"), vec!["tick@10", "tick@20", "tick@30", "tick@40"]);
    assert_eq!(stats.punctuations, 4);
}

#[tokio::test]
async fn test_reschedule_replaces_the_interval() {
    let log = EventLog::default();
    let l = log.clone();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    for (offset, ts) in [(0, 0), (1, 5), (2, 10), (3, 15)] {
        input.push_batch(vec![record("input", 0, offset, "k", "v", ts)]);
    }

    let topology = single_ticker(move || Ticker {
        reschedule: Some(Duration::from_millis(5)),
        ..Ticker::every(10, &l)
    });
    run_task(topology, &input, &output, fast_config()).await.unwrap();

    assert_eq!(fired(&log, "tick"), vec!["tick@5", "tick@10", "tick@15"]);
}

#[tokio::test]
async fn test_due_processors_fire_in_registration_order() {
    let log = EventLog::default();
    let (l1, l2) = (log.clone(), log.clone());
    let topology = TopologyBuilder::new()
        .source("in", ["input"])
        .processor("first", move || Ticker::every(10, &l1), &["in"])
        .processor("second", move || Ticker::every(10, &l2), &["in"])
        .build()
        .unwrap();

    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch(vec![record("input", 0, 0, "k", "v", 0)]);
    input.push_batch(vec![record("input", 0, 1, "k", "v", 20)]);

    run_task(topology, &input, &output, fast_config()).await.unwrap();

    let punctuations: Vec<String> = log
        .events()
        .into_iter()
        .filter(|event| event.contains('@'))
        .collect();
    assert_eq!(punctuations, vec!["first@10", "second@10", "first@20", "second@20"]);
}

#[tokio::test]
async fn test_no_punctuation_without_records() {
    let log = EventLog::default();
    let l = log.clone();
    let input = MemoryInputClient::new();
    let output = MemoryOutputClient::new();
    input.push_batch(Vec::new());

    let stats = run_task(single_ticker(move || Ticker::every(1, &l)), &input, &output, fast_config())
        .await
        .unwrap();

    assert!(log.events().is_empty());
    assert_eq!(stats.punctuations, 0);
    assert_eq!(stats.stream_time, None);
}

mod forwarding_tests {
    use super::*;

    /// Forwards a summary on every punctuation
    struct Emitter;

    impl Processor for Emitter {
        fn initialise(&mut self, _name: &str, ctx: &mut ProcessorContext<'_>) -> Result<()> {
            ctx.schedule(Duration::from_millis(10))
        }

        fn process(&mut self, _key: Option<&[u8]>, _value: &[u8], _ctx: &mut ProcessorContext<'_>) -> Result<()> {
            Ok(())
        }

        fn punctuate(&mut self, timestamp: i64, ctx: &mut ProcessorContext<'_>) -> Result<()> {
            ctx.forward(None, format!("tick-{timestamp}").as_bytes())
        }
    }

    /// Logs the context seen by a downstream node
    struct Observer {
        log: EventLog,
    }

    impl Processor for Observer {
        fn process(&mut self, key: Option<&[u8]>, value: &[u8], ctx: &mut ProcessorContext<'_>) -> Result<()> {
            self.log.push(format!(
                "{} ts={} record={} key={}",
                String::from_utf8_lossy(value),
                ctx.timestamp(),
                ctx.record().is_some(),
                key.is_some()
            ));
            ctx.forward(key, value)
        }
    }

    /// Fails every punctuation
    struct Broken;

    impl Processor for Broken {
        fn initialise(&mut self, _name: &str, ctx: &mut ProcessorContext<'_>) -> Result<()> {
            ctx.schedule(Duration::from_millis(10))
        }

        fn process(&mut self, _key: Option<&[u8]>, _value: &[u8], _ctx: &mut ProcessorContext<'_>) -> Result<()> {
            Ok(())
        }

        fn punctuate(&mut self, _timestamp: i64, _ctx: &mut ProcessorContext<'_>) -> Result<()> {
            Err(StreamsError::Serialization("state snapshot is corrupt".to_string()))
        }
    }

    #[tokio::test]
    async fn test_punctuation_forwards_carry_the_due_time() {
        let log = EventLog::default();
        let l = log.clone();
        let topology = TopologyBuilder::new()
            .source("in", ["input"])
            .processor("emit", || Emitter, &["in"])
            .processor("observe", move || Observer { log: l.clone() }, &["emit"])
            .sink("out", "summaries", &["observe"])
            .build()
            .unwrap();

        let input = MemoryInputClient::new();
        let output = MemoryOutputClient::new();
        input.push_batch(vec![
            record("input", 0, 0, "k", "v", 1_000),
            record("input", 0, 1, "k", "v", 1_013),
        ]);

        run_task(topology, &input, &output, fast_config()).await.unwrap();

        assert_eq!(log.events(), vec!["tick-1010 ts=1010 record=false key=false"]);
        let sent = output.sent_to("summaries");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, None);
        assert_eq!(sent[0].value, b"tick-1010".to_vec());
    }

    #[tokio::test]
    async fn test_punctuation_failure_is_attributed_to_the_node() {
        let topology = TopologyBuilder::new()
            .source("in", ["input"])
            .processor("broken", || Broken, &["in"])
            .build()
            .unwrap();

        let input = MemoryInputClient::new();
        let output = MemoryOutputClient::new();
        input.push_batch(vec![record("input", 0, 0, "k", "v", 0)]);
        input.push_batch(vec![record("input", 0, 1, "k", "v", 10)]);

        let err = run_task(topology, &input, &output, fast_config()).await.unwrap_err();

        match err {
            StreamsError::ProcessorRuntime { node, origin, source } => {
                assert_eq!(node, "broken");
                assert_eq!(origin, Origin::Punctuation { timestamp: 10 });
                assert!(source.to_string().contains("state snapshot is corrupt"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // the first batch was committed, the one whose punctuation failed was not
        assert_eq!(input.commits().len(), 1);
    }
}
