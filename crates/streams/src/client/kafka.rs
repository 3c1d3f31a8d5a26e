//! Kafka clients backed by rdkafka
//!
//! Consumers run with auto-commit disabled; the task decides when offsets
//! are persisted. Kafka expects the position of the next record to read, so
//! a committed value is the last processed offset plus one.

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{ClientContext, Message, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{ClientError, ClientResult, ClientSupplier, InputClient, OutputClient};
use crate::config::StreamsConfig;
use crate::record::{InputRecord, TopicPartition};

/// Upper bound for a producer send waiting on a full local queue
const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(5);

/// Classify an rdkafka error for the task retry policy
pub fn classify(err: KafkaError) -> ClientError {
    let transient = matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RequestTimedOut
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::QueueFull
                | RDKafkaErrorCode::NotLeaderForPartition
                | RDKafkaErrorCode::LeaderNotAvailable
                | RDKafkaErrorCode::CoordinatorLoadInProgress
                | RDKafkaErrorCode::CoordinatorNotAvailable
                | RDKafkaErrorCode::NotCoordinator
                | RDKafkaErrorCode::RebalanceInProgress
        )
    );

    if transient {
        ClientError::Transient(err.to_string())
    } else {
        ClientError::Fatal(err.to_string())
    }
}

/// Logs partition movements of one task's consumer
struct TaskConsumerContext {
    task_id: usize,
}

impl ClientContext for TaskConsumerContext {}

impl ConsumerContext for TaskConsumerContext {
    fn pre_rebalance(&self, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Revoke(tpl) => info!(task = self.task_id, partitions = tpl.count(), "Partitions revoked"),
            Rebalance::Assign(tpl) => info!(task = self.task_id, partitions = tpl.count(), "Partitions assigned"),
            Rebalance::Error(err) => error!(task = self.task_id, error = %err, "Rebalance error"),
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(err) = result {
            warn!(task = self.task_id, error = %err, "Commit callback reported an error");
        }
    }
}

/// Consumer for one task
pub struct KafkaInputClient {
    task_id: usize,
    consumer: StreamConsumer<TaskConsumerContext>,
    /// Error seen while draining a batch, reported by the next poll
    deferred: Option<ClientError>,
}

impl KafkaInputClient {
    pub fn new(task_id: usize, config: &StreamsConfig) -> ClientResult<Self> {
        let kafka = &config.kafka;
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", config.group_id())
            .set("client.id", format!("{}-{}", kafka.client_id, task_id))
            .set("auto.offset.reset", kafka.auto_offset_reset.as_str())
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");

        for (key, value) in &kafka.extra {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer<TaskConsumerContext> = client_config
            .create_with_context(TaskConsumerContext { task_id })
            .map_err(|e| ClientError::fatal(format!("failed to create consumer: {}", e)))?;

        Ok(Self {
            task_id,
            consumer,
            deferred: None,
        })
    }

    fn to_record(msg: &BorrowedMessage<'_>) -> InputRecord {
        let timestamp = msg
            .timestamp()
            .to_millis()
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        InputRecord {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(<[u8]>::to_vec),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            timestamp,
        }
    }
}

#[async_trait]
impl InputClient for KafkaInputClient {
    async fn subscribe(&mut self, topics: &[String]) -> ClientResult<()> {
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topic_refs).map_err(classify)?;

        info!(task = self.task_id, ?topics, "Subscribed to topics");
        Ok(())
    }

    async fn poll(&mut self, poll_timeout: Duration, max_records: usize) -> ClientResult<Vec<InputRecord>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }

        let mut records = Vec::new();
        match timeout(poll_timeout, self.consumer.recv()).await {
            Err(_) => return Ok(records),
            Ok(Err(err)) => return Err(classify(err)),
            Ok(Ok(msg)) => records.push(Self::to_record(&msg)),
        }

        // drain what is already buffered without waiting again
        while records.len() < max_records {
            match timeout(Duration::ZERO, self.consumer.recv()).await {
                Ok(Ok(msg)) => records.push(Self::to_record(&msg)),
                Ok(Err(err)) => {
                    warn!(task = self.task_id, error = %err, "Consumer error while draining batch");
                    self.deferred = Some(classify(err));
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(records)
    }

    async fn commit(&mut self, offsets: &BTreeMap<TopicPartition, i64>) -> ClientResult<()> {
        let mut tpl = TopicPartitionList::new();
        for (tp, offset) in offsets {
            tpl.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(offset + 1))
                .map_err(classify)?;
        }

        self.consumer.commit(&tpl, CommitMode::Sync).map_err(classify)?;
        debug!(task = self.task_id, partitions = offsets.len(), "Offsets committed");
        Ok(())
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.consumer.unsubscribe();
        info!(task = self.task_id, "Consumer closed");
        Ok(())
    }
}

/// Producer shared by all tasks
#[derive(Clone)]
pub struct KafkaOutputClient {
    producer: FutureProducer,
}

impl KafkaOutputClient {
    pub fn new(config: &StreamsConfig) -> ClientResult<Self> {
        let kafka = &config.kafka;
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &kafka.brokers)
            .set("client.id", format!("{}-producer", kafka.client_id))
            .set("acks", "all");

        for (key, value) in &kafka.extra {
            client_config.set(key, value);
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| ClientError::fatal(format!("failed to create producer: {}", e)))?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl OutputClient for KafkaOutputClient {
    async fn send(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> ClientResult<()> {
        let mut record = FutureRecord::<[u8], [u8]>::to(topic).payload(value);
        if let Some(key) = key {
            record = record.key(key);
        }

        self.producer
            .send(record, Timeout::After(SEND_QUEUE_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(err, _)| classify(err))
    }

    async fn flush(&self, flush_timeout: Duration) -> ClientResult<()> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(flush_timeout)))
            .await
            .map_err(|e| ClientError::fatal(format!("flush did not complete: {}", e)))?
            .map_err(classify)
    }
}

/// Creates Kafka clients from a [`StreamsConfig`]
#[derive(Debug, Clone)]
pub struct KafkaClientSupplier {
    config: StreamsConfig,
}

impl KafkaClientSupplier {
    pub fn new(config: StreamsConfig) -> Self {
        Self { config }
    }
}

impl ClientSupplier for KafkaClientSupplier {
    fn input_client(&self, task_id: usize) -> ClientResult<Box<dyn InputClient>> {
        Ok(Box::new(KafkaInputClient::new(task_id, &self.config)?))
    }

    fn output_client(&self) -> ClientResult<Arc<dyn OutputClient>> {
        Ok(Arc::new(KafkaOutputClient::new(&self.config)?))
    }
}
