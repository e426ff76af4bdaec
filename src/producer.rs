use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use wp_log::info_data;

use crate::config::{EndpointConfig, TOPIC_HEADER};
use crate::convert::{FormatConverter, PayloadConverter};
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::Lifecycle;
use crate::message::{Body, Message, TopicRecord, Value};
use crate::session::{BrokerClient, ProducerSession};

/// Converts outbound messages into broker records: one publish per call,
/// a single record for scalar bodies and one batch for sequence bodies.
pub struct ProducerBridge {
    endpoint: Arc<EndpointConfig>,
    broker: Arc<dyn BrokerClient>,
    converter: Arc<dyn PayloadConverter>,
    session: Option<ProducerSession>,
}

impl ProducerBridge {
    /// Uses a [`FormatConverter`] selected by the endpoint's serializer.
    pub fn new(endpoint: Arc<EndpointConfig>, broker: Arc<dyn BrokerClient>) -> Self {
        let converter = Arc::new(FormatConverter::from_name(endpoint.serializer_format()));
        Self::with_converter(endpoint, broker, converter)
    }

    pub fn with_converter(
        endpoint: Arc<EndpointConfig>,
        broker: Arc<dyn BrokerClient>,
        converter: Arc<dyn PayloadConverter>,
    ) -> Self {
        Self {
            endpoint,
            broker,
            converter,
            session: None,
        }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Header override first, endpoint topic otherwise.
    pub fn resolve_topic<'a>(&'a self, message: &'a Message) -> &'a str {
        message
            .header(TOPIC_HEADER)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(self.endpoint.topic.as_str())
    }

    fn convert(&self, value: &Value, element: impl FnOnce() -> String) -> BridgeResult<Bytes> {
        self.converter
            .convert_to_bytes(value)
            .ok_or_else(|| BridgeError::conversion(element()))
    }

    /// Publishes one message. A message without body is a no-op.
    pub async fn process(&self, message: &Message) -> BridgeResult<()> {
        let Some(body) = message.body() else {
            return Ok(());
        };
        let session = self.session.as_ref().ok_or(BridgeError::SessionClosed)?;
        let topic = self.resolve_topic(message);
        let key = message.key();

        match body {
            Body::Single(value) => {
                let payload = self.convert(value, || format!("payload {}", value.describe()))?;
                session
                    .publish(TopicRecord::new(topic, key, payload))
                    .await?;
                log::debug!("[kafka-bridge] sent 1 record to {}", topic);
            }
            Body::Sequence(values) => {
                if values.is_empty() {
                    return Ok(());
                }
                // convert everything first; a failed element must not leave a partial batch behind
                let records = values
                    .iter()
                    .enumerate()
                    .map(|(idx, value)| {
                        self.convert(value, || format!("element #{idx} {}", value.describe()))
                            .map(|payload| TopicRecord::new(topic, key.clone(), payload))
                    })
                    .collect::<BridgeResult<Vec<_>>>()?;
                let count = records.len();
                session.publish_batch(records).await?;
                log::debug!("[kafka-bridge] sent batch of {} records to {}", count, topic);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Lifecycle for ProducerBridge {
    async fn start(&mut self) -> BridgeResult<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = ProducerSession::open(self.broker.as_ref(), &self.endpoint).await?;
        self.session = Some(session);
        info_data!("[kafka-bridge] producer started: topic {}", self.endpoint.topic);
        Ok(())
    }

    async fn stop(&mut self) -> BridgeResult<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        session.close().await?;
        info_data!("[kafka-bridge] producer stopped: topic {}", self.endpoint.topic);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.session.is_some()
    }
}
