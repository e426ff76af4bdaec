use std::time::Duration;

use orion_conf::error::{ConfIOReason, OrionConfResult};
use orion_error::{ToStructError, UvsFrom};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use wp_conf_base::structure::Validate;

use crate::error::{BridgeError, BridgeResult};

/// Message attribute overriding the destination topic; consumed messages carry their origin topic here.
pub const TOPIC_HEADER: &str = "kafka_topic";
/// Message attribute carrying the record key.
pub const KEY_HEADER: &str = "kafka_key";
pub const PARTITION_HEADER: &str = "kafka_partition";
pub const OFFSET_HEADER: &str = "kafka_offset";

/// Formats accepted by the `serializer` selector.
pub const SERIALIZER_FORMATS: [&str; 7] = ["json", "csv", "show", "kv", "raw", "proto", "proto-text"];

#[derive(Debug, Default, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// send-and-wait
    #[default]
    Sync,
    /// enqueue-and-return, batched by the client
    Async,
}

/// Endpoint parameters. Every field is defaulted so a sparse parameter map always deserializes.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    pub topic: String,
    pub brokers: String,
    pub group_id: String,
    pub concurrent_consumers: usize,

    // consumer side
    pub socket_timeout_ms: u64,
    pub socket_buffer_size: u64,
    pub fetch_size: u64,
    pub auto_commit_enable: bool,
    pub auto_commit_interval_ms: u64,
    pub auto_offset_reset: String,
    /// 负数表示一直阻塞等待
    pub consumer_timeout_ms: i64,
    pub queue_capacity: usize,

    // producer side
    pub producer_type: DeliveryMode,
    #[serde(alias = "fmt")]
    pub serializer: String,
    pub partitioner: String,
    pub interceptor_plugins: String,
    pub buffer_size: u64,
    pub connect_timeout_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub max_message_size: u64,
    pub compression_codec: String,
    pub request_required_acks: i32,
    pub send_timeout_ms: u64,

    // async delivery only
    pub queue_time_ms: u64,
    pub queue_size: u64,
    pub batch_size: u64,

    // topic provisioning
    pub create_topic: bool,
    pub num_partitions: i32,
    pub replication: i32,

    #[serde(deserialize_with = "deserialize_overrides")]
    pub config: Option<Vec<String>>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            brokers: "localhost:9092".to_string(),
            group_id: "wp_events_group".to_string(),
            concurrent_consumers: 1,
            socket_timeout_ms: 30_000,
            socket_buffer_size: 64 * 1024,
            fetch_size: 1024 * 1024,
            auto_commit_enable: true,
            auto_commit_interval_ms: 60_000,
            auto_offset_reset: "largest".to_string(),
            consumer_timeout_ms: -1,
            queue_capacity: 1024,
            producer_type: DeliveryMode::Sync,
            serializer: String::new(),
            partitioner: String::new(),
            interceptor_plugins: String::new(),
            buffer_size: 100 * 1024,
            connect_timeout_ms: 5_000,
            reconnect_backoff_ms: 100,
            max_message_size: 1_000_000,
            compression_codec: "none".to_string(),
            request_required_acks: 1,
            send_timeout_ms: 5_000,
            queue_time_ms: 5_000,
            queue_size: 10_000,
            batch_size: 200,
            create_topic: false,
            num_partitions: 1,
            replication: 1,
            config: None,
        }
    }
}

impl EndpointConfig {
    pub fn new(topic: &str, brokers: &str) -> Self {
        Self {
            topic: topic.to_string(),
            brokers: brokers.to_string(),
            ..Self::default()
        }
    }

    /// Builds the endpoint from the framework's flat parameter map. Unknown keys are ignored.
    pub fn from_params<'a, I>(params: I) -> BridgeResult<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let map = params
            .into_iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<serde_json::Map<String, Value>>();
        let conf: Self = serde_json::from_value(Value::Object(map))
            .map_err(|e| BridgeError::configuration(format!("kafka endpoint: {e}")))?;
        conf.check()?;
        Ok(conf)
    }

    /// Same rules as [`Validate`], reported in the bridge taxonomy.
    pub fn check(&self) -> BridgeResult<()> {
        match self.validation_error() {
            Some(msg) => Err(BridgeError::Configuration(msg)),
            None => Ok(()),
        }
    }

    pub fn is_async(&self) -> bool {
        self.producer_type == DeliveryMode::Async
    }

    pub fn consumer_timeout(&self) -> Option<Duration> {
        u64::try_from(self.consumer_timeout_ms)
            .ok()
            .map(Duration::from_millis)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Serializer format name, `json` when unset.
    pub fn serializer_format(&self) -> &str {
        match self.serializer.trim() {
            "" => "json",
            fmt => fmt,
        }
    }

    fn validation_error(&self) -> Option<String> {
        if self.topic.trim().is_empty() {
            return Some("kafka.topic must not be empty".into());
        }
        if self.brokers.split(',').all(|b| b.trim().is_empty()) {
            return Some("kafka.brokers must not be empty".into());
        }
        if self.concurrent_consumers == 0 {
            return Some("kafka.concurrent_consumers must be > 0".into());
        }
        if self.queue_capacity == 0 {
            return Some("kafka.queue_capacity must be > 0".into());
        }
        if !SERIALIZER_FORMATS.contains(&self.serializer_format()) {
            return Some(format!(
                "invalid serializer: '{}'; allowed: {}",
                self.serializer.trim(),
                SERIALIZER_FORMATS.join(",")
            ));
        }
        if self.create_topic && (self.num_partitions <= 0 || self.replication <= 0) {
            return Some("kafka.num_partitions and kafka.replication must be > 0".into());
        }
        None
    }
}

impl Validate for EndpointConfig {
    fn validate(&self) -> OrionConfResult<()> {
        match self.validation_error() {
            Some(msg) => Err(ConfIOReason::from_validation().to_err().with_detail(msg)),
            None => Ok(()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn deserialize_overrides<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<OneOrMany>::deserialize(deserializer)?;
    let items = match raw {
        None => return Ok(None),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    };
    let items = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    Ok(if items.is_empty() { None } else { Some(items) })
}
