use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use orion_error::ErrorOweBase;
use wp_connector_api::{AsyncCtrl, AsyncRawDataSink, AsyncRecordSink, SinkReason, SinkResult};
use wp_model_core::model::DataRecord;

use crate::config::EndpointConfig;
use crate::lifecycle::Lifecycle;
use crate::message::{Message, Value};
use crate::producer::ProducerBridge;
use crate::session::BrokerClient;

/// wp-flow sink backed by a [`ProducerBridge`]; batch calls become one broker batch.
pub struct KafkaBridgeSink {
    pub(crate) bridge: ProducerBridge,
}

impl KafkaBridgeSink {
    pub async fn from_endpoint(
        endpoint: Arc<EndpointConfig>,
        broker: Arc<dyn BrokerClient>,
    ) -> anyhow::Result<Self> {
        let mut bridge = ProducerBridge::new(endpoint, broker);
        bridge.start().await?;
        Ok(Self { bridge })
    }

    async fn send(&self, msg: Message) -> SinkResult<()> {
        self.bridge
            .process(&msg)
            .await
            .owe(SinkReason::Sink("kafka send fail".into()))
    }
}

#[async_trait]
impl AsyncCtrl for KafkaBridgeSink {
    async fn stop(&mut self) -> SinkResult<()> {
        self.bridge
            .stop()
            .await
            .owe(SinkReason::Sink("kafka stop fail".into()))
    }
    async fn reconnect(&mut self) -> SinkResult<()> {
        if let Err(e) = self.bridge.stop().await {
            wp_log::warn_data!("[kafka-bridge] close before reconnect failed: {}", e);
        }
        self.bridge
            .start()
            .await
            .owe(SinkReason::Sink("kafka reconnect fail".into()))
    }
}

#[async_trait]
impl AsyncRawDataSink for KafkaBridgeSink {
    async fn sink_str(&mut self, data: &str) -> SinkResult<()> {
        self.send(Message::single(data)).await
    }
    async fn sink_bytes(&mut self, data: &[u8]) -> SinkResult<()> {
        self.send(Message::single(Bytes::copy_from_slice(data)))
            .await
    }

    async fn sink_str_batch(&mut self, data: Vec<&str>) -> SinkResult<()> {
        self.send(Message::sequence(data)).await
    }

    async fn sink_bytes_batch(&mut self, data: Vec<&[u8]>) -> SinkResult<()> {
        let values = data
            .into_iter()
            .map(|b| Value::Bytes(Bytes::copy_from_slice(b)));
        self.send(Message::sequence(values)).await
    }
}

#[async_trait]
impl AsyncRecordSink for KafkaBridgeSink {
    async fn sink_record(&mut self, data: &DataRecord) -> SinkResult<()> {
        self.send(Message::single(Value::Record(Arc::new(data.clone()))))
            .await
    }
    async fn sink_records(&mut self, data: Vec<Arc<DataRecord>>) -> SinkResult<()> {
        self.send(Message::sequence(data.into_iter().map(Value::Record)))
            .await
    }
}
