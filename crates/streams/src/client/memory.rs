//! In-memory clients
//!
//! Scriptable stand-ins for the log system. Every client is a cheap handle
//! over shared state, so a caller can keep a clone to feed batches, inject
//! failures and inspect commits after handing the client to a task.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::{ClientError, ClientResult, ClientSupplier, InputClient, OutputClient};
use crate::record::{InputRecord, TopicPartition};

/// Longest an empty poll sleeps, so idle tasks notice shutdown quickly
const MAX_IDLE_POLL: Duration = Duration::from_millis(10);

/// Observable call on a [`MemoryInputClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Poll { records: usize },
    PollFailed,
    Commit(BTreeMap<TopicPartition, i64>),
    CommitFailed,
}

#[derive(Debug, Default)]
struct InputState {
    polls: VecDeque<ClientResult<Vec<InputRecord>>>,
    commit_failures: VecDeque<ClientError>,
    committed: BTreeMap<TopicPartition, i64>,
    events: Vec<ClientEvent>,
    subscriptions: Vec<String>,
    closed: bool,
}

/// Input client fed from a queue of scripted poll results
#[derive(Debug, Clone, Default)]
pub struct MemoryInputClient {
    state: Arc<Mutex<InputState>>,
}

impl MemoryInputClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch returned by a later poll
    pub fn push_batch(&self, records: Vec<InputRecord>) {
        self.state.lock().polls.push_back(Ok(records));
    }

    /// Queue a failing poll
    pub fn push_poll_error(&self, error: ClientError) {
        self.state.lock().polls.push_back(Err(error));
    }

    /// Make the next `count` commits fail with `error`
    pub fn fail_next_commits(&self, count: usize, error: ClientError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.commit_failures.push_back(error.clone());
        }
    }

    /// Latest committed offset per partition
    pub fn committed(&self) -> BTreeMap<TopicPartition, i64> {
        self.state.lock().committed.clone()
    }

    /// Successful commits in call order
    pub fn commits(&self) -> Vec<BTreeMap<TopicPartition, i64>> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Commit(offsets) => Some(offsets.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every poll and commit in call order
    pub fn events(&self) -> Vec<ClientEvent> {
        self.state.lock().events.clone()
    }

    /// Scripted polls not consumed yet
    pub fn pending_polls(&self) -> usize {
        self.state.lock().polls.len()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[async_trait]
impl InputClient for MemoryInputClient {
    async fn subscribe(&mut self, topics: &[String]) -> ClientResult<()> {
        self.state.lock().subscriptions = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration, max_records: usize) -> ClientResult<Vec<InputRecord>> {
        let next = {
            let mut state = self.state.lock();
            match state.polls.pop_front() {
                Some(Ok(mut records)) => {
                    if records.len() > max_records {
                        let rest = records.split_off(max_records);
                        state.polls.push_front(Ok(rest));
                    }
                    state.events.push(ClientEvent::Poll {
                        records: records.len(),
                    });
                    Some(Ok(records))
                }
                Some(Err(error)) => {
                    state.events.push(ClientEvent::PollFailed);
                    Some(Err(error))
                }
                None => None,
            }
        };

        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(timeout.min(MAX_IDLE_POLL)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn commit(&mut self, offsets: &BTreeMap<TopicPartition, i64>) -> ClientResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.commit_failures.pop_front() {
            state.events.push(ClientEvent::CommitFailed);
            return Err(error);
        }

        for (tp, offset) in offsets {
            state.committed.insert(tp.clone(), *offset);
        }
        state.events.push(ClientEvent::Commit(offsets.clone()));
        Ok(())
    }

    async fn close(&mut self) -> ClientResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// A record written through a [`MemoryOutputClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl SentRecord {
    /// Key and value as UTF-8 strings, for assertions
    pub fn as_strings(&self) -> (String, String) {
        (
            String::from_utf8_lossy(self.key.as_deref().unwrap_or_default()).into_owned(),
            String::from_utf8_lossy(&self.value).into_owned(),
        )
    }
}

#[derive(Debug, Default)]
struct OutputState {
    sent: Vec<SentRecord>,
    send_failures: VecDeque<ClientError>,
    attempts: usize,
    flushes: usize,
}

/// Output client that keeps every written record
#[derive(Debug, Clone, Default)]
pub struct MemoryOutputClient {
    state: Arc<Mutex<OutputState>>,
}

impl MemoryOutputClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` sends fail with `error`
    pub fn fail_next_sends(&self, count: usize, error: ClientError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.send_failures.push_back(error.clone());
        }
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.state.lock().sent.clone()
    }

    /// Records written to one topic
    pub fn sent_to(&self, topic: &str) -> Vec<SentRecord> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Send calls including failed ones
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    pub fn flushes(&self) -> usize {
        self.state.lock().flushes
    }
}

#[async_trait]
impl OutputClient for MemoryOutputClient {
    async fn send(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> ClientResult<()> {
        let mut state = self.state.lock();
        state.attempts += 1;
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }

        state.sent.push(SentRecord {
            topic: topic.to_string(),
            key: key.map(<[u8]>::to_vec),
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> ClientResult<()> {
        self.state.lock().flushes += 1;
        Ok(())
    }
}

/// Supplier handing out pre-built in-memory clients
///
/// Task `i` receives the `i`-th registered input client; tasks without a
/// registered client get a fresh, empty one.
#[derive(Debug, Clone, Default)]
pub struct MemoryClientSupplier {
    inputs: Vec<MemoryInputClient>,
    output: MemoryOutputClient,
}

impl MemoryClientSupplier {
    pub fn new(inputs: Vec<MemoryInputClient>, output: MemoryOutputClient) -> Self {
        Self { inputs, output }
    }

    pub fn output(&self) -> &MemoryOutputClient {
        &self.output
    }
}

impl ClientSupplier for MemoryClientSupplier {
    fn input_client(&self, task_id: usize) -> ClientResult<Box<dyn InputClient>> {
        let client = self.inputs.get(task_id).cloned().unwrap_or_default();
        Ok(Box::new(client))
    }

    fn output_client(&self) -> ClientResult<Arc<dyn OutputClient>> {
        Ok(Arc::new(self.output.clone()))
    }
}
