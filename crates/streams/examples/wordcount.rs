//! Word count over Kafka
//!
//! Counts the words of every line written to `wks-wordcount-example-topic`
//! and, every five seconds of stream time, writes the counts that changed to
//! `wks-wordcount-example-count`.
//!
//! # Setup
//!
//! 1. Start Kafka and create both topics:
//!    ```bash
//!    kafka-topics --create --topic wks-wordcount-example-topic --bootstrap-server localhost:9092
//!    kafka-topics --create --topic wks-wordcount-example-count --bootstrap-server localhost:9092
//!    ```
//!
//! 2. Run the example (an optional YAML config path may be given):
//!    ```bash
//!    RUST_LOG=info cargo run --example wordcount
//!    WKS_KAFKA__BROKERS=broker:9092 cargo run --example wordcount -- streams.yaml
//!    ```
//!
//! 3. Produce lines and watch the counts:
//!    ```bash
//!    kafka-console-producer --topic wks-wordcount-example-topic --bootstrap-server localhost:9092
//!    kafka-console-consumer --topic wks-wordcount-example-count --bootstrap-server localhost:9092 \
//!        --property print.key=true --from-beginning
//!    ```

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wks_streams::{
    KafkaClientSupplier, Processor, ProcessorContext, Result, Serde, StreamsConfig, StreamsRuntime,
    StringSerde, TopologyBuilder,
};

const INPUT_TOPIC: &str = "wks-wordcount-example-topic";
const OUTPUT_TOPIC: &str = "wks-wordcount-example-count";
const EMIT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct WordCount {
    counts: HashMap<String, i64>,
    changed: BTreeSet<String>,
}

impl Processor for WordCount {
    fn initialise(&mut self, name: &str, ctx: &mut ProcessorContext<'_>) -> Result<()> {
        info!(node = name, task = ctx.task_id(), "Counting words");
        ctx.schedule(EMIT_INTERVAL)
    }

    fn process(&mut self, _key: Option<&[u8]>, value: &[u8], _ctx: &mut ProcessorContext<'_>) -> Result<()> {
        let line = StringSerde.deserialize(value)?;
        for word in line.split_whitespace().map(str::to_lowercase) {
            *self.counts.entry(word.clone()).or_default() += 1;
            self.changed.insert(word);
        }
        Ok(())
    }

    fn punctuate(&mut self, _timestamp: i64, ctx: &mut ProcessorContext<'_>) -> Result<()> {
        for word in std::mem::take(&mut self.changed) {
            let count = self.counts.get(&word).copied().unwrap_or_default();
            ctx.forward(Some(word.as_bytes()), count.to_string().as_bytes())?;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = StreamsConfig::load(std::env::args().nth(1).map(PathBuf::from))?;
    if config.application_id == StreamsConfig::default().application_id {
        config.application_id = "wks-wordcount-example".to_string();
    }

    let topology = TopologyBuilder::new()
        .source("input-value", [INPUT_TOPIC])
        .processor("count", WordCount::default, &["input-value"])
        .sink("output-count", OUTPUT_TOPIC, &["count"])
        .build()?;
    info!("{}", topology);

    let supplier = KafkaClientSupplier::new(config.clone());
    let mut runtime = StreamsRuntime::new(topology, config, supplier)?;

    runtime
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    for stats in runtime.stats().await {
        info!(
            task = stats.task_id,
            records = stats.records_processed,
            punctuations = stats.punctuations,
            commits = stats.commits,
            "Task finished"
        );
    }
    Ok(())
}
