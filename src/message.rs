use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use wp_model_core::model::DataRecord;

use crate::config::{KEY_HEADER, OFFSET_HEADER, PARTITION_HEADER, TOPIC_HEADER};

/// A single in-flight value.
#[derive(Clone)]
pub enum Value {
    Bytes(Bytes),
    Text(String),
    Json(serde_json::Value),
    Record(Arc<DataRecord>),
}

impl Value {
    /// Short human-readable form used in logs and conversion errors.
    pub fn describe(&self) -> String {
        match self {
            Value::Bytes(b) => format!("bytes[{}]", b.len()),
            Value::Text(s) => format!("{s:?}"),
            Value::Json(v) => v.to_string(),
            Value::Record(r) => format!("record[{} fields]", r.items.len()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

/// Payload shape, resolved once when the message is built.
#[derive(Debug, Clone)]
pub enum Body {
    Single(Value),
    Sequence(Vec<Value>),
}

/// Routing envelope: string attributes, an optional raw record key and an optional body.
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: BTreeMap<String, String>,
    key: Option<Bytes>,
    body: Option<Body>,
}

impl Message {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(value: impl Into<Value>) -> Self {
        Self {
            body: Some(Body::Single(value.into())),
            ..Self::default()
        }
    }

    pub fn sequence<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            body: Some(Body::Sequence(values.into_iter().map(Into::into).collect())),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_string(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Raw record key, kept byte-exact.
    pub fn with_key(mut self, key: Bytes) -> Self {
        self.key = Some(key);
        self
    }

    /// Raw key if set, else the UTF-8 [`KEY_HEADER`] attribute.
    pub fn key(&self) -> Option<Bytes> {
        self.key.clone().or_else(|| {
            self.header(KEY_HEADER)
                .map(|k| Bytes::copy_from_slice(k.as_bytes()))
        })
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn into_body(self) -> Option<Body> {
        self.body
    }
}

/// Outbound record, consumed once by a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRecord {
    pub topic: String,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl TopicRecord {
    pub fn new(topic: impl Into<String>, key: Option<Bytes>, payload: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
        }
    }
}

/// Record pulled from a partition stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Bytes>,
    pub payload: Bytes,
}

impl InboundRecord {
    /// Converts into a routed message tagged with its origin; the payload bytes pass through unmodified.
    pub fn into_message(self) -> Message {
        let mut msg = Message::single(Value::Bytes(self.payload))
            .with_header(TOPIC_HEADER, self.topic)
            .with_header(PARTITION_HEADER, self.partition.to_string())
            .with_header(OFFSET_HEADER, self.offset.to_string());
        if let Some(key) = self.key {
            // binary keys only travel as raw bytes
            if let Ok(text) = std::str::from_utf8(&key) {
                msg.set_header(KEY_HEADER, text);
            }
            msg = msg.with_key(key);
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_record_becomes_tagged_message() {
        let rec = InboundRecord {
            topic: "orders".into(),
            partition: 3,
            offset: 42,
            key: Some(Bytes::from_static(b"k1")),
            payload: Bytes::from_static(b"hello"),
        };
        let msg = rec.into_message();
        assert_eq!(msg.header(TOPIC_HEADER), Some("orders"));
        assert_eq!(msg.header(PARTITION_HEADER), Some("3"));
        assert_eq!(msg.header(OFFSET_HEADER), Some("42"));
        assert_eq!(msg.header(KEY_HEADER), Some("k1"));
        match msg.body() {
            Some(Body::Single(Value::Bytes(b))) => assert_eq!(b.as_ref(), b"hello"),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn binary_keys_stay_byte_exact() {
        let raw = Bytes::from_static(&[0xff, 0x00, 0xfe]);
        let rec = InboundRecord {
            topic: "orders".into(),
            partition: 0,
            offset: 1,
            key: Some(raw.clone()),
            payload: Bytes::new(),
        };
        let msg = rec.into_message();
        assert_eq!(msg.header(KEY_HEADER), None);
        assert_eq!(msg.key(), Some(raw));
    }

    #[test]
    fn header_key_is_used_without_raw_key() {
        let msg = Message::single("x").with_header(KEY_HEADER, "user-1");
        assert_eq!(msg.key(), Some(Bytes::from_static(b"user-1")));
    }

    #[test]
    fn sequence_keeps_element_order() {
        let msg = Message::sequence(["a", "b", "c"]);
        let Some(Body::Sequence(items)) = msg.body() else {
            panic!("expected sequence");
        };
        let described = items.iter().map(Value::describe).collect::<Vec<_>>();
        assert_eq!(described, vec!["\"a\"", "\"b\"", "\"c\""]);
    }
}
