use bytes::Bytes;
use wp_data_fmt::{DataFormat, FormatType};
use wp_model_core::model::fmt_def::TextFmt;

use crate::message::Value;

/// Type-conversion collaborator used by the produce path.
pub trait PayloadConverter: Send + Sync {
    /// `None` means the value has no byte representation.
    fn convert_to_bytes(&self, value: &Value) -> Option<Bytes>;
}

/// Default converter. Bytes and text pass through; JSON is serialized;
/// records are rendered with the configured text format.
pub struct FormatConverter {
    fmt: TextFmt,
}

impl FormatConverter {
    pub fn new(fmt: TextFmt) -> Self {
        Self { fmt }
    }

    pub fn from_name(name: &str) -> Self {
        Self::new(TextFmt::from(name))
    }
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self::new(TextFmt::Json)
    }
}

impl PayloadConverter for FormatConverter {
    fn convert_to_bytes(&self, value: &Value) -> Option<Bytes> {
        match value {
            Value::Bytes(b) => Some(b.clone()),
            Value::Text(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Value::Json(serde_json::Value::Null) => None,
            Value::Json(serde_json::Value::String(s)) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Value::Json(v) => serde_json::to_vec(v).ok().map(Bytes::from),
            Value::Record(record) => {
                let fmt = FormatType::from(&self.fmt);
                let line = format!("{}\n", fmt.format_record(record.as_ref()));
                Some(Bytes::from(line))
            }
        }
    }
}
