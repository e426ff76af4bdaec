//! wp-kafka-bridge: Kafka consumer/producer bridge for wp-flow
//!
//! 模块划分：
//! - config / translate：端点参数与 librdkafka 客户端配置转换
//! - session：broker 客户端契约与会话
//! - worker / consumer：分区流工作池
//! - producer / convert：按消息体形态发布单条或批量记录
//! - kafka：librdkafka 实现与 wp-connector-api 的 Source/Sink/Factory

/// Tag key for access source identifier
pub const WP_SRC_VAL: &str = "wp_src_val";

pub mod config;
pub mod consumer;
pub mod convert;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod producer;
pub mod session;
pub mod translate;
pub mod worker;

#[cfg(test)]
mod testing;

// Kafka：默认启用（feature = "kafka" 是默认特性）
#[cfg(feature = "kafka")]
pub mod kafka;

pub use config::{DeliveryMode, EndpointConfig, KEY_HEADER, TOPIC_HEADER};
pub use consumer::ConsumerBridge;
pub use convert::{FormatConverter, PayloadConverter};
pub use error::{BridgeError, BridgeResult};
pub use lifecycle::Lifecycle;
pub use message::{Body, Message, Value};
pub use producer::ProducerBridge;
pub use session::BrokerClient;
pub use worker::{MessageProcessor, WorkerReport, WorkerState};
