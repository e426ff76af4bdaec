//! librdkafka 实现的 BrokerClient
//!
//! 每个分区流对应同组内的一个 StreamConsumer，由 broker 的 rebalance 分配分区。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka_wrap::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka_wrap::client::DefaultClientContext;
use rdkafka_wrap::config::RDKafkaLogLevel;
use rdkafka_wrap::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka_wrap::error::KafkaError;
use rdkafka_wrap::producer::{DeliveryFuture, FutureProducer, FutureRecord, Producer};
use rdkafka_wrap::types::RDKafkaErrorCode;
use rdkafka_wrap::util::Timeout;
use rdkafka_wrap::{ClientConfig, Message};
use tokio::time::Instant;
use wp_log::{error_data, info_data, warn_data};

use crate::config::EndpointConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::message::{InboundRecord, TopicRecord};
use crate::session::{
    BrokerClient, ConsumerHandle, ConsumerParts, ProducerHandle, ProducerOptions, RecordStream,
};
use crate::translate::ClientProps;

type AnyResult<T> = anyhow::Result<T>;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct TopicProvision {
    topic: String,
    num_partitions: i32,
    replication: i32,
}

/// Broker client backed by librdkafka.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    metadata_timeout: Duration,
    provision: Option<TopicProvision>,
}

impl Default for KafkaBroker {
    fn default() -> Self {
        Self {
            metadata_timeout: Duration::from_secs(10),
            provision: None,
        }
    }
}

impl KafkaBroker {
    pub fn new(metadata_timeout: Duration) -> Self {
        Self {
            metadata_timeout,
            provision: None,
        }
    }

    /// Broker for an endpoint: checks metadata within the socket timeout and provisions the topic when asked to.
    pub fn for_endpoint(conf: &EndpointConfig) -> Self {
        let broker = Self::new(Duration::from_millis(conf.socket_timeout_ms));
        if conf.create_topic {
            broker.with_provisioning(&conf.topic, conf.num_partitions, conf.replication)
        } else {
            broker
        }
    }

    pub fn with_provisioning(mut self, topic: &str, num_partitions: i32, replication: i32) -> Self {
        self.provision = Some(TopicProvision {
            topic: topic.to_string(),
            num_partitions,
            replication,
        });
        self
    }

    async fn provision(&self, props: &ClientProps) {
        let Some(spec) = &self.provision else {
            return;
        };
        if let Err(e) = create_topic(props, spec).await {
            warn_data!("[kafka-bridge] topic {} provisioning failed: {}", spec.topic, e);
        }
    }
}

fn client_config(props: &ClientProps) -> ClientConfig {
    let mut cfg = ClientConfig::new();
    for (k, v) in props.iter() {
        cfg.set(k, v);
    }
    cfg.set_log_level(RDKafkaLogLevel::Info);
    cfg
}

async fn create_topic(props: &ClientProps, spec: &TopicProvision) -> AnyResult<()> {
    let mut cfg = ClientConfig::new();
    if let Some(servers) = props.get("bootstrap.servers") {
        cfg.set("bootstrap.servers", servers);
    }
    let admin: AdminClient<DefaultClientContext> =
        cfg.set_log_level(RDKafkaLogLevel::Info).create()?;
    let new_topic = NewTopic::new(
        &spec.topic,
        spec.num_partitions,
        TopicReplication::Fixed(spec.replication),
    );
    let results = admin
        .create_topics::<Vec<&NewTopic>>(vec![&new_topic], &AdminOptions::new())
        .await?;
    for r in results {
        match r {
            Ok(name) => info_data!("[kafka-bridge] topic '{}' created", name),
            Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                info_data!("[kafka-bridge] topic {} already exists, continuing", name)
            }
            Err((name, code)) => anyhow::bail!("failed to create topic {name}: {code}"),
        }
    }
    Ok(())
}

/// Fails fast when no broker answers a metadata request.
async fn check_metadata(
    consumer: Arc<StreamConsumer>,
    topic: String,
    timeout: Duration,
) -> BridgeResult<()> {
    tokio::task::spawn_blocking(move || consumer.fetch_metadata(Some(&topic), timeout))
        .await
        .map_err(|e| BridgeError::connect(e.to_string()))?
        .map(|_| ())
        .map_err(|e| BridgeError::connect(e.to_string()))
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn open_consumer(
        &self,
        props: &ClientProps,
        topic: &str,
        streams: usize,
    ) -> BridgeResult<ConsumerParts> {
        self.provision(props).await;
        // consumers created so far are dropped (and leave the group) on any failure below
        let mut consumers = Vec::with_capacity(streams);
        for _ in 0..streams {
            let consumer: StreamConsumer = client_config(props)
                .create()
                .map_err(|e| BridgeError::connect(format!("create consumer: {e}")))?;
            consumer
                .subscribe(&[topic])
                .map_err(|e| BridgeError::connect(format!("subscribe {topic}: {e}")))?;
            consumers.push(Arc::new(consumer));
        }
        if let Some(first) = consumers.first() {
            check_metadata(first.clone(), topic.to_string(), self.metadata_timeout).await?;
        }

        let streams = consumers
            .iter()
            .map(|c| {
                Box::new(KafkaRecordStream {
                    consumer: c.clone(),
                }) as Box<dyn RecordStream>
            })
            .collect();
        Ok(ConsumerParts {
            handle: Box::new(KafkaConsumerGroup { consumers }),
            streams,
        })
    }

    async fn open_producer(
        &self,
        props: &ClientProps,
        options: ProducerOptions,
    ) -> BridgeResult<Box<dyn ProducerHandle>> {
        self.provision(props).await;
        let producer: FutureProducer = client_config(props)
            .create()
            .map_err(|e| BridgeError::connect(format!("create producer: {e}")))?;
        let metadata_client = producer.clone();
        let timeout = self.metadata_timeout;
        tokio::task::spawn_blocking(move || {
            metadata_client
                .client()
                .fetch_metadata(None, Timeout::After(timeout))
        })
        .await
        .map_err(|e| BridgeError::connect(e.to_string()))?
        .map_err(|e| BridgeError::connect(e.to_string()))?;
        Ok(Box::new(KafkaProducer { producer, options }))
    }
}

struct KafkaRecordStream {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl RecordStream for KafkaRecordStream {
    async fn next_record(&mut self) -> BridgeResult<InboundRecord> {
        loop {
            match self.consumer.recv().await {
                Ok(msg) => {
                    return Ok(InboundRecord {
                        topic: msg.topic().to_string(),
                        partition: msg.partition(),
                        offset: msg.offset(),
                        key: msg.key().map(Bytes::copy_from_slice),
                        payload: Bytes::copy_from_slice(msg.payload().unwrap_or(&[])),
                    });
                }
                Err(KafkaError::PartitionEOF(_)) => continue,
                Err(e) => return Err(BridgeError::StreamTermination(e.to_string())),
            }
        }
    }
}

struct KafkaConsumerGroup {
    consumers: Vec<Arc<StreamConsumer>>,
}

#[async_trait]
impl ConsumerHandle for KafkaConsumerGroup {
    /// Stored on whichever group member owns the partition; librdkafka commits `offset + 1`.
    fn store_offset(&self, topic: &str, partition: i32, offset: i64) -> BridgeResult<()> {
        let mut last_err = None;
        for consumer in &self.consumers {
            match consumer.store_offset(topic, partition, offset) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        let why = last_err.map_or_else(|| "no consumer".to_string(), |e| e.to_string());
        Err(BridgeError::StreamTermination(format!(
            "store offset {topic}/{partition}@{offset}: {why}"
        )))
    }

    async fn commit_offsets(&self) -> BridgeResult<()> {
        let consumers = self.consumers.clone();
        tokio::task::spawn_blocking(move || {
            for consumer in &consumers {
                match consumer.commit_consumer_state(CommitMode::Sync) {
                    Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
                    Err(e) => return Err(BridgeError::StreamTermination(format!("commit: {e}"))),
                }
            }
            Ok(())
        })
        .await
        .map_err(|e| BridgeError::StreamTermination(format!("commit task: {e}")))?
    }

    async fn close(&self) -> BridgeResult<()> {
        for consumer in &self.consumers {
            consumer.unsubscribe();
        }
        Ok(())
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    options: ProducerOptions,
}

fn future_record(rec: &TopicRecord) -> FutureRecord<'_, [u8], [u8]> {
    let fr = FutureRecord::<[u8], [u8]>::to(&rec.topic).payload(rec.payload.as_ref());
    match &rec.key {
        Some(key) => fr.key(key.as_ref()),
        None => fr,
    }
}

impl KafkaProducer {
    /// Enqueues one record, waiting out a full local queue until `deadline`.
    async fn enqueue(&self, rec: &TopicRecord, deadline: Instant) -> BridgeResult<DeliveryFuture> {
        let mut pending = future_record(rec);
        loop {
            match self.producer.send_result(pending) {
                Ok(delivery) => return Ok(delivery),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), back))
                    if Instant::now() < deadline =>
                {
                    pending = back;
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err((e, _)) => {
                    return Err(BridgeError::Publish(format!("enqueue to {}: {e}", rec.topic)));
                }
            }
        }
    }

    fn detach(topic: String, delivery: DeliveryFuture) {
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _))) => {
                    error_data!("[kafka-bridge] async delivery to {} failed: {}", topic, e)
                }
                Err(_) => error_data!("[kafka-bridge] async delivery to {} cancelled", topic),
            }
        });
    }

    async fn await_delivery(topic: &str, delivery: DeliveryFuture) -> BridgeResult<()> {
        match delivery.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err((e, _))) => Err(BridgeError::Publish(format!("deliver to {topic}: {e}"))),
            Err(_) => Err(BridgeError::Publish(format!("delivery to {topic} cancelled"))),
        }
    }
}

#[async_trait]
impl ProducerHandle for KafkaProducer {
    async fn send(&self, record: TopicRecord) -> BridgeResult<()> {
        if self.options.async_delivery {
            let deadline = Instant::now() + self.options.send_timeout;
            let delivery = self.enqueue(&record, deadline).await?;
            Self::detach(record.topic, delivery);
            return Ok(());
        }
        self.producer
            .send(future_record(&record), self.options.send_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| BridgeError::Publish(format!("send to {}: {e}", record.topic)))
    }

    async fn send_batch(&self, records: Vec<TopicRecord>) -> BridgeResult<()> {
        let deadline = Instant::now() + self.options.send_timeout;
        let mut pending = Vec::with_capacity(records.len());
        for (idx, record) in records.iter().enumerate() {
            match self.enqueue(record, deadline).await {
                Ok(delivery) => pending.push((record.topic.clone(), delivery)),
                Err(e) => {
                    if !pending.is_empty() {
                        error_data!(
                            "[kafka-bridge] batch split at element #{}: {} records already enqueued",
                            idx,
                            pending.len()
                        );
                    }
                    // earlier records stay queued; their outcome is still reported
                    for (topic, delivery) in pending {
                        Self::detach(topic, delivery);
                    }
                    return Err(e);
                }
            }
        }
        if self.options.async_delivery {
            for (topic, delivery) in pending {
                Self::detach(topic, delivery);
            }
            return Ok(());
        }
        for (topic, delivery) in pending {
            Self::await_delivery(&topic, delivery).await?;
        }
        Ok(())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.producer
            .flush(Timeout::After(FLUSH_TIMEOUT))
            .map_err(|e| BridgeError::Publish(format!("flush on close: {e}")))
    }
}
