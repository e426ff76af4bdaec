//! EndpointConfig -> librdkafka 客户端配置
//!
//! 纯转换，无网络 I/O。异步投递相关的键只在 `producer_type = async` 时写入，
//! 空的选择器字段不会被转发。

use std::collections::BTreeMap;

use crate::config::EndpointConfig;
use crate::error::BridgeResult;

/// librdkafka keys that only apply to asynchronous delivery.
pub const ASYNC_ONLY_KEYS: [&str; 4] = [
    "queue.buffering.max.ms",
    "queue.buffering.max.messages",
    "batch.num.messages",
    "plugin.library.paths",
];

/// Flat broker client configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ClientProps {
    entries: BTreeMap<String, String>,
}

impl ClientProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    fn set_non_empty(&mut self, key: &str, value: &str) -> &mut Self {
        let value = value.trim();
        if !value.is_empty() {
            self.set(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Applies raw `key = value` overrides; malformed entries are skipped.
    fn apply_overrides(&mut self, items: Option<&Vec<String>>) {
        let Some(items) = items else {
            return;
        };
        for item in items {
            let Some((k, v)) = item.split_once('=') else {
                wp_log::warn_data!("[kafka-bridge] ignore malformed client override: {}", item);
                continue;
            };
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                continue;
            }
            self.set(k, v);
        }
    }
}

/// Consumer-group session configuration.
pub fn consumer_props(conf: &EndpointConfig) -> BridgeResult<ClientProps> {
    conf.check()?;
    let mut props = ClientProps::new();
    props
        .set("bootstrap.servers", conf.brokers.trim())
        .set("group.id", conf.group_id.trim())
        .set("socket.timeout.ms", conf.socket_timeout_ms)
        .set("socket.receive.buffer.bytes", conf.socket_buffer_size)
        .set("fetch.message.max.bytes", conf.fetch_size)
        .set("enable.auto.commit", conf.auto_commit_enable)
        // offsets are stored once a record reaches the routing pipeline
        .set("enable.auto.offset.store", false)
        .set("auto.commit.interval.ms", conf.auto_commit_interval_ms)
        .set("auto.offset.reset", conf.auto_offset_reset.trim());
    props.apply_overrides(conf.config.as_ref());
    Ok(props)
}

/// Producer handle configuration.
pub fn producer_props(conf: &EndpointConfig) -> BridgeResult<ClientProps> {
    conf.check()?;
    let mut props = ClientProps::new();
    props
        .set("bootstrap.servers", conf.brokers.trim())
        .set("socket.send.buffer.bytes", conf.buffer_size)
        .set("socket.connection.setup.timeout.ms", conf.connect_timeout_ms)
        .set("socket.timeout.ms", conf.socket_timeout_ms)
        .set("reconnect.backoff.ms", conf.reconnect_backoff_ms)
        .set("message.max.bytes", conf.max_message_size)
        .set("compression.codec", conf.compression_codec.trim())
        .set("request.required.acks", conf.request_required_acks)
        .set_non_empty("partitioner", &conf.partitioner);
    if conf.is_async() {
        props
            .set("queue.buffering.max.ms", conf.queue_time_ms)
            .set("queue.buffering.max.messages", conf.queue_size)
            .set("batch.num.messages", conf.batch_size)
            .set_non_empty("plugin.library.paths", &conf.interceptor_plugins);
    }
    props.apply_overrides(conf.config.as_ref());
    Ok(props)
}
