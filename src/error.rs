//! 桥接层错误分类
//!
//! 配置与连接错误会中止启动；转换错误返回给发送方；转发错误只记录日志。

/// Errors raised by the bridge core.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A required endpoint parameter is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The broker could not be reached while opening a session.
    #[error("broker connect error: {0}")]
    BrokerConnect(String),
    /// A payload element could not be turned into bytes.
    #[error("conversion error: unable to convert {element} to bytes")]
    Conversion { element: String },
    /// The routing pipeline rejected a consumed record.
    #[error("forwarding error: {0}")]
    Forwarding(String),
    /// A partition stream ended or timed out.
    #[error("stream terminated: {0}")]
    StreamTermination(String),
    /// The broker refused or failed to deliver a record.
    #[error("publish error: {0}")]
    Publish(String),
    #[error("broker session is not open")]
    SessionClosed,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn connect(msg: impl Into<String>) -> Self {
        Self::BrokerConnect(msg.into())
    }

    pub fn conversion(element: impl Into<String>) -> Self {
        Self::Conversion {
            element: element.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_error_names_the_element() {
        let err = BridgeError::conversion("element #2 (null)");
        assert_eq!(
            err.to_string(),
            "conversion error: unable to convert element #2 (null) to bytes"
        );
    }
}
