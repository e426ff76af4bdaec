//! Broker client contract and the session wrappers that own it.
//!
//! A session is exclusively owned by one bridge; `close` is idempotent and
//! every operation after close fails with [`BridgeError::SessionClosed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::config::{EndpointConfig, OFFSET_HEADER, PARTITION_HEADER, TOPIC_HEADER};
use crate::error::{BridgeError, BridgeResult};
use crate::message::{InboundRecord, Message, TopicRecord};
use crate::translate::{ClientProps, consumer_props, producer_props};

/// One partition-assigned stream of records.
#[async_trait]
pub trait RecordStream: Send {
    /// Blocks until the next record arrives. An error ends the stream.
    async fn next_record(&mut self) -> BridgeResult<InboundRecord>;
}

#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    /// Records `offset` as delivered. Only stored offsets are ever committed.
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> BridgeResult<()>;
    async fn commit_offsets(&self) -> BridgeResult<()>;
    async fn close(&self) -> BridgeResult<()>;
}

#[async_trait]
pub trait ProducerHandle: Send + Sync {
    async fn send(&self, record: TopicRecord) -> BridgeResult<()>;
    async fn send_batch(&self, records: Vec<TopicRecord>) -> BridgeResult<()>;
    async fn close(&self) -> BridgeResult<()>;
}

/// Consumer handle together with the streams it opened.
pub struct ConsumerParts {
    pub handle: Box<dyn ConsumerHandle>,
    pub streams: Vec<Box<dyn RecordStream>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerOptions {
    pub async_delivery: bool,
    pub send_timeout: std::time::Duration,
}

impl ProducerOptions {
    pub fn from_endpoint(conf: &EndpointConfig) -> Self {
        Self {
            async_delivery: conf.is_async(),
            send_timeout: conf.send_timeout(),
        }
    }
}

/// Capability-providing broker client.
///
/// Implementations must not leave anything open when `open_consumer` fails.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn open_consumer(
        &self,
        props: &ClientProps,
        topic: &str,
        streams: usize,
    ) -> BridgeResult<ConsumerParts>;

    async fn open_producer(
        &self,
        props: &ClientProps,
        options: ProducerOptions,
    ) -> BridgeResult<Box<dyn ProducerHandle>>;
}

/// Marks consumed records as delivered to the routing pipeline.
///
/// Shared by whoever hands records over; marks after the session closed are dropped.
#[derive(Clone)]
pub struct DeliveryTracker {
    handle: Arc<dyn ConsumerHandle>,
    closed: Arc<AtomicBool>,
}

impl DeliveryTracker {
    pub fn mark(&self, topic: &str, partition: i32, offset: i64) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = self.handle.store_offset(topic, partition, offset) {
            wp_log::warn_data!(
                "[kafka-bridge] store offset {}/{}@{} failed: {}",
                topic,
                partition,
                offset,
                e
            );
        }
    }

    /// Marks the origin of a consumed message. Messages without origin headers are ignored.
    pub fn mark_message(&self, message: &Message) {
        let topic = message.header(TOPIC_HEADER);
        let partition = message.header(PARTITION_HEADER).and_then(|p| p.parse().ok());
        let offset = message.header(OFFSET_HEADER).and_then(|o| o.parse().ok());
        if let (Some(topic), Some(partition), Some(offset)) = (topic, partition, offset) {
            self.mark(topic, partition, offset);
        }
    }
}

pub struct ConsumerSession {
    handle: Arc<dyn ConsumerHandle>,
    closed: Arc<AtomicBool>,
}

impl ConsumerSession {
    /// Opens a consumer-group session with `concurrent_consumers` streams.
    pub async fn open(
        broker: &dyn BrokerClient,
        conf: &EndpointConfig,
    ) -> BridgeResult<(Self, Vec<Box<dyn RecordStream>>)> {
        let props = consumer_props(conf)?;
        let wanted = conf.concurrent_consumers;
        let ConsumerParts { handle, streams } =
            broker.open_consumer(&props, &conf.topic, wanted).await?;
        let session = Self {
            handle: Arc::from(handle),
            closed: Arc::new(AtomicBool::new(false)),
        };
        if streams.is_empty() {
            session.close().await?;
            return Err(BridgeError::StreamTermination(format!(
                "broker returned no streams for topic {}",
                conf.topic
            )));
        }
        if streams.len() != wanted {
            wp_log::warn_data!(
                "[kafka-bridge] topic {} requested {} streams, got {}",
                conf.topic,
                wanted,
                streams.len()
            );
        }
        wp_log::info_data!(
            "[kafka-bridge] consumer session open: topic {}, group {}, streams {}",
            conf.topic,
            conf.group_id,
            streams.len()
        );
        Ok((session, streams))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn tracker(&self) -> DeliveryTracker {
        DeliveryTracker {
            handle: self.handle.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Commits the offsets stored through [`DeliveryTracker`].
    pub async fn commit_offsets(&self) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        self.handle.commit_offsets().await
    }

    pub async fn close(&self) -> BridgeResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.handle.close().await
    }
}

pub struct ProducerSession {
    handle: Box<dyn ProducerHandle>,
    closed: AtomicBool,
}

impl ProducerSession {
    pub async fn open(broker: &dyn BrokerClient, conf: &EndpointConfig) -> BridgeResult<Self> {
        let props = producer_props(conf)?;
        let handle = broker
            .open_producer(&props, ProducerOptions::from_endpoint(conf))
            .await?;
        wp_log::info_data!(
            "[kafka-bridge] producer session open: topic {}, mode {:?}",
            conf.topic,
            conf.producer_type
        );
        Ok(Self {
            handle,
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn publish(&self, record: TopicRecord) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        self.handle.send(record).await
    }

    pub async fn publish_batch(&self, records: Vec<TopicRecord>) -> BridgeResult<()> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        self.handle.send_batch(records).await
    }

    pub async fn close(&self) -> BridgeResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.handle.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBroker, record};
    use bytes::Bytes;

    #[tokio::test]
    async fn consumer_close_is_idempotent() {
        let broker = FakeBroker::with_streams(vec![vec![]]);
        let conf = EndpointConfig::new("t", "b:9092");
        let (session, _streams) = ConsumerSession::open(&broker, &conf).await.expect("open");
        session.close().await.expect("first close");
        session.close().await.expect("second close");
        assert_eq!(broker.stats().consumer_closes, 1);
        assert_eq!(
            session.commit_offsets().await,
            Err(BridgeError::SessionClosed)
        );
    }

    #[tokio::test]
    async fn only_tracked_offsets_are_committed() {
        let broker = FakeBroker::with_streams(vec![vec![]]);
        let conf = EndpointConfig::new("t", "b:9092");
        let (session, _streams) = ConsumerSession::open(&broker, &conf).await.expect("open");
        let tracker = session.tracker();

        tracker.mark_message(&record(2, 7).into_message());
        tracker.mark_message(&Message::single("no origin"));
        session.commit_offsets().await.expect("commit");
        session.close().await.expect("close");
        tracker.mark("orders", 2, 9);

        let stats = broker.stats();
        assert_eq!(stats.committed.get(&("orders".to_string(), 2)), Some(&7));
        assert_eq!(stats.committed.len(), 1);
        assert_eq!(stats.stored.get(&("orders".to_string(), 2)), Some(&7));
    }

    #[tokio::test]
    async fn zero_streams_closes_the_session() {
        let broker = FakeBroker::with_streams(vec![]);
        let conf = EndpointConfig::new("t", "b:9092");
        let err = ConsumerSession::open(&broker, &conf)
            .await
            .err()
            .expect("no streams");
        assert!(matches!(err, BridgeError::StreamTermination(_)));
        assert_eq!(broker.stats().consumer_closes, 1);
    }

    #[tokio::test]
    async fn invalid_config_never_reaches_the_broker() {
        let broker = FakeBroker::with_streams(vec![vec![]]);
        let conf = EndpointConfig::new("", "b:9092");
        let err = ProducerSession::open(&broker, &conf)
            .await
            .err()
            .expect("topic missing");
        assert!(matches!(err, BridgeError::Configuration(_)));
        assert_eq!(broker.stats().producer_opens, 0);
    }

    #[tokio::test]
    async fn publish_after_close_is_rejected() {
        let broker = FakeBroker::default();
        let conf = EndpointConfig::new("t", "b:9092");
        let session = ProducerSession::open(&broker, &conf).await.expect("open");
        session.close().await.expect("close");
        session.close().await.expect("close twice");
        let rec = TopicRecord::new("t", None, Bytes::from_static(b"x"));
        assert_eq!(session.publish(rec).await, Err(BridgeError::SessionClosed));
        assert_eq!(broker.stats().producer_closes, 1);
    }
}
