use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use orion_error::ErrorOweBase;
use tokio::sync::mpsc;
use wp_connector_api::{
    DataSource, SourceBatch, SourceError, SourceEvent, SourceReason, SourceResult, Tags,
};
use wp_model_core::raw::RawData;

use crate::WP_SRC_VAL;
use crate::config::{EndpointConfig, TOPIC_HEADER};
use crate::consumer::ConsumerBridge;
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::Lifecycle;
use crate::message::{Body, Message, Value};
use crate::session::{BrokerClient, DeliveryTracker};
use crate::worker::MessageProcessor;

const IDLE_CHECK: Duration = Duration::from_millis(500);

/// Hands consumed messages to the pull-based source through a bounded queue.
pub struct ChannelProcessor {
    tx: mpsc::Sender<Message>,
}

impl ChannelProcessor {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl MessageProcessor for ChannelProcessor {
    async fn process(&self, message: Message) -> BridgeResult<()> {
        self.tx
            .send(message)
            .await
            .map_err(|_| BridgeError::Forwarding("source queue closed".into()))
    }
}

/// wp-flow source backed by a [`ConsumerBridge`].
pub struct KafkaBridgeSource {
    key: String,
    tags: Tags,
    bridge: ConsumerBridge,
    rx: mpsc::Receiver<Message>,
    tracker: Option<DeliveryTracker>,
    event_seq: u64,
}

impl KafkaBridgeSource {
    pub fn identifier(&self) -> &str {
        &self.key
    }

    /// Starts the consumer pool; fails without leaving workers behind.
    ///
    /// A record counts as delivered only once `receive` hands it out, so records
    /// still queued at stop time are consumed again after a restart.
    pub async fn new(
        key: String,
        tags: Tags,
        endpoint: Arc<EndpointConfig>,
        broker: Arc<dyn BrokerClient>,
    ) -> BridgeResult<Self> {
        let (tx, rx) = mpsc::channel(endpoint.queue_capacity);
        let processor = Arc::new(ChannelProcessor::new(tx));
        let mut bridge = ConsumerBridge::new(endpoint, broker, processor).with_deferred_delivery();
        bridge.start().await?;
        let tracker = bridge.delivery_tracker();
        Ok(Self {
            key,
            tags,
            bridge,
            rx,
            tracker,
            event_seq: 0,
        })
    }

    pub fn bridge(&self) -> &ConsumerBridge {
        &self.bridge
    }

    /// Closes the queue first so workers blocked on a full queue reach their stop check.
    pub async fn stop(&mut self) -> BridgeResult<()> {
        self.rx.close();
        self.bridge.stop().await
    }

    fn to_event(&mut self, msg: Message) -> SourceEvent {
        if let Some(tracker) = &self.tracker {
            tracker.mark_message(&msg);
        }
        let topic = msg
            .header(TOPIC_HEADER)
            .unwrap_or(self.bridge.endpoint().topic.as_str())
            .to_string();
        let payload = match msg.into_body() {
            Some(Body::Single(Value::Bytes(b))) => b,
            _ => Bytes::new(),
        };
        let mut stags = self.tags.clone();
        stags.set(WP_SRC_VAL, topic);
        self.event_seq = self.event_seq.wrapping_add(1);
        SourceEvent::new(
            self.event_seq,
            self.key.clone(),
            RawData::Bytes(payload),
            stags.into(),
        )
    }

    pub async fn recv_impl(&mut self) -> SourceResult<SourceBatch> {
        match tokio::time::timeout(IDLE_CHECK, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(vec![self.to_event(msg)]),
            Ok(None) => Err(SourceError::from(SourceReason::EOF)),
            Err(_) if self.bridge.is_running() && self.bridge.running_workers() == 0 => {
                Err(SourceError::from(SourceReason::EOF))
            }
            Err(_) => Err(SourceError::from(SourceReason::NotData)),
        }
    }
}

#[async_trait]
impl DataSource for KafkaBridgeSource {
    async fn receive(&mut self) -> SourceResult<SourceBatch> {
        self.recv_impl().await
    }
    fn try_receive(&mut self) -> Option<SourceBatch> {
        let msg = self.rx.try_recv().ok()?;
        Some(vec![self.to_event(msg)])
    }
    fn supports_try_receive(&self) -> bool {
        true
    }
    fn identifier(&self) -> String {
        self.identifier().to_string()
    }
    async fn close(&mut self) -> SourceResult<()> {
        self.stop()
            .await
            .owe(SourceReason::Other("kafka close fail".into()))
    }
}
