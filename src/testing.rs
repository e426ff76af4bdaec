//! Scripted broker, streams and processor for unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{BridgeError, BridgeResult};
use crate::message::{InboundRecord, Message, TopicRecord};
use crate::session::{
    BrokerClient, ConsumerHandle, ConsumerParts, ProducerHandle, ProducerOptions, RecordStream,
};
use crate::translate::ClientProps;
use crate::worker::MessageProcessor;

pub fn record(partition: i32, offset: i64) -> InboundRecord {
    InboundRecord {
        topic: "orders".into(),
        partition,
        offset,
        key: None,
        payload: Bytes::from(format!("p{partition}-o{offset}")),
    }
}

pub struct FakeStream {
    records: VecDeque<InboundRecord>,
    pending_at_end: bool,
}

impl FakeStream {
    /// Yields the records, then reports end of stream.
    pub fn finite(records: Vec<InboundRecord>) -> Self {
        Self {
            records: records.into(),
            pending_at_end: false,
        }
    }

    /// Yields the records, then blocks forever.
    pub fn pending_after(records: Vec<InboundRecord>) -> Self {
        Self {
            records: records.into(),
            pending_at_end: true,
        }
    }
}

#[async_trait]
impl RecordStream for FakeStream {
    async fn next_record(&mut self) -> BridgeResult<InboundRecord> {
        if let Some(rec) = self.records.pop_front() {
            return Ok(rec);
        }
        if self.pending_at_end {
            std::future::pending::<()>().await;
        }
        Err(BridgeError::StreamTermination("end of stream".into()))
    }
}

#[derive(Default)]
pub struct RecordingProcessor {
    accepted: Mutex<Vec<Message>>,
    reject: HashSet<i64>,
    seen: AtomicUsize,
}

impl RecordingProcessor {
    pub fn rejecting_offsets(offsets: &[i64]) -> Self {
        Self {
            reject: offsets.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn accepted(&self) -> Vec<Message> {
        self.accepted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn seen(&self) -> usize {
        self.seen.load(Ordering::SeqCst)
    }

    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.seen() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("processor saw enough messages");
    }
}

#[async_trait]
impl MessageProcessor for RecordingProcessor {
    async fn process(&self, message: Message) -> BridgeResult<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        let offset = message
            .header(crate::config::OFFSET_HEADER)
            .and_then(|o| o.parse::<i64>().ok());
        if offset.is_some_and(|o| self.reject.contains(&o)) {
            return Err(BridgeError::Forwarding("rejected by test pipeline".into()));
        }
        self.accepted.lock().expect("lock").push(message);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Single(TopicRecord),
    Batch(Vec<TopicRecord>),
}

#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    pub consumer_opens: usize,
    pub requested_streams: usize,
    pub commits: usize,
    /// Last delivered offset per (topic, partition), as stored by the tracker.
    pub stored: BTreeMap<(String, i32), i64>,
    /// Snapshot of `stored` taken by the last commit.
    pub committed: BTreeMap<(String, i32), i64>,
    pub consumer_closes: usize,
    pub producer_opens: usize,
    pub producer_closes: usize,
    pub published: Vec<Published>,
    pub last_props: Option<ClientProps>,
    pub last_options: Option<ProducerOptions>,
    /// Ordered session calls, e.g. `commit`, `close`.
    pub events: Vec<&'static str>,
}

impl BrokerStats {
    pub fn single_sends(&self) -> usize {
        self.published
            .iter()
            .filter(|p| matches!(p, Published::Single(_)))
            .count()
    }

    pub fn batch_sends(&self) -> usize {
        self.published
            .iter()
            .filter(|p| matches!(p, Published::Batch(_)))
            .count()
    }
}

#[derive(Default)]
pub struct FakeBroker {
    plan: Mutex<Vec<FakeStream>>,
    unreachable: bool,
    stats: Arc<Mutex<BrokerStats>>,
}

impl FakeBroker {
    pub fn with_streams(streams: Vec<Vec<InboundRecord>>) -> Self {
        Self {
            plan: Mutex::new(streams.into_iter().map(FakeStream::finite).collect()),
            ..Self::default()
        }
    }

    pub fn with_pending_streams(n: usize) -> Self {
        Self {
            plan: Mutex::new((0..n).map(|_| FakeStream::pending_after(vec![])).collect()),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats.lock().expect("lock").clone()
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn open_consumer(
        &self,
        props: &ClientProps,
        _topic: &str,
        streams: usize,
    ) -> BridgeResult<ConsumerParts> {
        {
            let mut stats = self.stats.lock().expect("lock");
            stats.requested_streams = streams;
            stats.last_props = Some(props.clone());
        }
        if self.unreachable {
            return Err(BridgeError::connect("coordinator unreachable"));
        }
        self.stats.lock().expect("lock").consumer_opens += 1;
        let streams = std::mem::take(&mut *self.plan.lock().expect("lock"))
            .into_iter()
            .map(|s| Box::new(s) as Box<dyn RecordStream>)
            .collect();
        Ok(ConsumerParts {
            handle: Box::new(FakeConsumer {
                stats: self.stats.clone(),
            }),
            streams,
        })
    }

    async fn open_producer(
        &self,
        props: &ClientProps,
        options: ProducerOptions,
    ) -> BridgeResult<Box<dyn ProducerHandle>> {
        if self.unreachable {
            return Err(BridgeError::connect("brokers unreachable"));
        }
        let mut stats = self.stats.lock().expect("lock");
        stats.producer_opens += 1;
        stats.last_props = Some(props.clone());
        stats.last_options = Some(options);
        Ok(Box::new(FakeProducer {
            stats: self.stats.clone(),
        }))
    }
}

struct FakeConsumer {
    stats: Arc<Mutex<BrokerStats>>,
}

#[async_trait]
impl ConsumerHandle for FakeConsumer {
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> BridgeResult<()> {
        self.stats
            .lock()
            .expect("lock")
            .stored
            .insert((topic.to_string(), partition), offset);
        Ok(())
    }

    async fn commit_offsets(&self) -> BridgeResult<()> {
        let mut stats = self.stats.lock().expect("lock");
        stats.commits += 1;
        stats.committed = stats.stored.clone();
        stats.events.push("commit");
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        let mut stats = self.stats.lock().expect("lock");
        stats.consumer_closes += 1;
        stats.events.push("close");
        Ok(())
    }
}

struct FakeProducer {
    stats: Arc<Mutex<BrokerStats>>,
}

#[async_trait]
impl ProducerHandle for FakeProducer {
    async fn send(&self, record: TopicRecord) -> BridgeResult<()> {
        self.stats
            .lock()
            .expect("lock")
            .published
            .push(Published::Single(record));
        Ok(())
    }

    async fn send_batch(&self, records: Vec<TopicRecord>) -> BridgeResult<()> {
        self.stats
            .lock()
            .expect("lock")
            .published
            .push(Published::Batch(records));
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.stats.lock().expect("lock").producer_closes += 1;
        Ok(())
    }
}
