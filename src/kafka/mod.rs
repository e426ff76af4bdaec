//! wp-kafka-bridge: librdkafka client + wp-flow Source/Sink + Factories
//!
//! 模块划分：
//! - client：KafkaBroker（BrokerClient 的 librdkafka 实现，含建 Topic）
//! - source：KafkaBridgeSource（ConsumerBridge + 有界队列）
//! - sink：KafkaBridgeSink（AsyncRawDataSink/AsyncRecordSink）
//! - factory：Source/Sink 工厂与连接器定义

mod client;
mod factory;
mod sink;
mod source;

pub use client::KafkaBroker;
pub use factory::{KafkaBridgeSinkFactory, KafkaBridgeSourceFactory};
pub use sink::KafkaBridgeSink;
pub use source::{ChannelProcessor, KafkaBridgeSource};
