use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use wp_connector_api::{
    ConnectorDef, ConnectorScope, ParamMap, SinkBuildCtx, SinkDefProvider, SinkError, SinkFactory,
    SinkHandle, SinkReason, SinkResult, SinkSpec, SourceDefProvider, SourceFactory, SourceHandle,
    SourceMeta, SourceReason, SourceResult, SourceSvcIns, Tags,
};

use crate::WP_SRC_VAL;
use crate::config::EndpointConfig;
use crate::kafka::{KafkaBridgeSink, KafkaBridgeSource, KafkaBroker};

const SOURCE_OVERRIDES: [&str; 9] = [
    "brokers",
    "topic",
    "group_id",
    "concurrent_consumers",
    "consumer_timeout_ms",
    "auto_offset_reset",
    "auto_commit_enable",
    "queue_capacity",
    "config",
];

const SINK_OVERRIDES: [&str; 12] = [
    "brokers",
    "topic",
    "producer_type",
    "serializer",
    "fmt",
    "partitioner",
    "batch_size",
    "queue_time_ms",
    "create_topic",
    "num_partitions",
    "replication",
    "config",
];

fn build_source_endpoint(spec: &wp_connector_api::SourceSpec) -> SourceResult<EndpointConfig> {
    EndpointConfig::from_params(&spec.params)
        .map_err(|err| SourceReason::Other(err.to_string()).into())
}

/// `key=value` entries become tags; bare words become keys with an empty value.
fn spec_tags(raw_tags: &[String]) -> Tags {
    let mut tags = Tags::new();
    for raw in raw_tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        let (key, value) = raw.split_once('=').unwrap_or((raw, ""));
        if !key.trim().is_empty() {
            tags.set(key.trim().to_string(), value.trim().to_string());
        }
    }
    tags
}

fn build_sink_endpoint(spec: &SinkSpec) -> SinkResult<EndpointConfig> {
    EndpointConfig::from_params(&spec.params)
        .map_err(|err| SinkReason::sink(err.to_string()).into())
}

pub struct KafkaBridgeSourceFactory;

#[async_trait]
impl SourceFactory for KafkaBridgeSourceFactory {
    fn kind(&self) -> &'static str {
        "kafka_bridge"
    }

    fn validate_spec(&self, spec: &wp_connector_api::SourceSpec) -> SourceResult<()> {
        build_source_endpoint(spec)?;
        Ok(())
    }

    async fn build(
        &self,
        spec: &wp_connector_api::SourceSpec,
        _ctx: &wp_connector_api::SourceBuildCtx,
    ) -> SourceResult<SourceSvcIns> {
        let conf = Arc::new(build_source_endpoint(spec)?);

        let mut meta_tags = spec_tags(&spec.tags);
        meta_tags.set(WP_SRC_VAL, spec.kind.clone());
        let broker = Arc::new(KafkaBroker::for_endpoint(&conf));
        let source = KafkaBridgeSource::new(spec.name.clone(), meta_tags.clone(), conf, broker)
            .await
            .map_err(|err| SourceReason::Other(err.to_string()))?;

        let mut meta = SourceMeta::new(spec.name.clone(), spec.kind.clone());
        meta.tags = meta_tags;
        let handle = SourceHandle::new(Box::new(source), meta);
        Ok(SourceSvcIns::new().with_sources(vec![handle]))
    }
}

pub struct KafkaBridgeSinkFactory;

#[async_trait]
impl SinkFactory for KafkaBridgeSinkFactory {
    fn kind(&self) -> &'static str {
        "kafka_bridge"
    }

    fn validate_spec(&self, spec: &SinkSpec) -> SinkResult<()> {
        build_sink_endpoint(spec)?;
        Ok(())
    }

    async fn build(&self, spec: &SinkSpec, _ctx: &SinkBuildCtx) -> SinkResult<SinkHandle> {
        let conf = Arc::new(build_sink_endpoint(spec)?);
        let broker = Arc::new(KafkaBroker::for_endpoint(&conf));
        let sink = KafkaBridgeSink::from_endpoint(conf, broker)
            .await
            .map_err(|err| {
                SinkError::from(SinkReason::sink(format!("init kafka sink failed: {err}")))
            })?;
        Ok(SinkHandle::new(Box::new(sink)))
    }
}

impl SourceDefProvider for KafkaBridgeSourceFactory {
    fn source_def(&self) -> ConnectorDef {
        ConnectorDef {
            id: "kafka_bridge_src".into(),
            kind: self.kind().into(),
            scope: ConnectorScope::Source,
            allow_override: SOURCE_OVERRIDES.iter().map(|s| s.to_string()).collect(),
            default_params: kafka_source_defaults(),
            origin: Some("wp-kafka-bridge:source".into()),
        }
    }
}

impl SinkDefProvider for KafkaBridgeSinkFactory {
    fn sink_def(&self) -> ConnectorDef {
        ConnectorDef {
            id: "kafka_bridge_sink".into(),
            kind: self.kind().into(),
            scope: ConnectorScope::Sink,
            allow_override: SINK_OVERRIDES.iter().map(|s| s.to_string()).collect(),
            default_params: kafka_sink_defaults(),
            origin: Some("wp-kafka-bridge:sink".into()),
        }
    }
}

fn kafka_source_defaults() -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("brokers".into(), json!("localhost:9092"));
    params.insert("topic".into(), json!("wp_events"));
    params.insert("group_id".into(), json!("wp_events_group"));
    params.insert("concurrent_consumers".into(), json!(1));
    params.insert("auto_offset_reset".into(), json!("largest"));
    params
}

fn kafka_sink_defaults() -> ParamMap {
    let mut params = ParamMap::new();
    params.insert("brokers".into(), json!("localhost:9092"));
    params.insert("topic".into(), json!("wp_events"));
    params.insert("producer_type".into(), json!("sync"));
    params.insert("serializer".into(), json!("json"));
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryMode;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    fn build_source_spec(params: BTreeMap<String, Value>) -> wp_connector_api::SourceSpec {
        wp_connector_api::SourceSpec {
            name: "kafka_bridge_source".into(),
            kind: "kafka_bridge".into(),
            connector_id: "connector".into(),
            params,
            tags: vec![],
        }
    }

    fn build_sink_spec(params: BTreeMap<String, Value>) -> SinkSpec {
        SinkSpec {
            name: "kafka_bridge_sink".into(),
            kind: "kafka_bridge".into(),
            connector_id: "connector".into(),
            group: "group".into(),
            params,
            filter: None,
        }
    }

    #[test]
    fn source_endpoint_from_spec_parses_fields() {
        let mut params = BTreeMap::new();
        params.insert("brokers".into(), json!("b1:9092,b2:9092"));
        params.insert("topic".into(), json!("orders"));
        params.insert("group_id".into(), json!("group-a"));
        params.insert("concurrent_consumers".into(), json!(4));
        params.insert("config".into(), json!(["session.timeout.ms=10000"]));
        let spec = build_source_spec(params);

        let conf = build_source_endpoint(&spec).expect("valid spec");
        assert_eq!(conf.brokers, "b1:9092,b2:9092");
        assert_eq!(conf.topic, "orders");
        assert_eq!(conf.group_id, "group-a");
        assert_eq!(conf.concurrent_consumers, 4);
        assert_eq!(
            conf.config,
            Some(vec!["session.timeout.ms=10000".to_string()])
        );
    }

    #[test]
    fn source_spec_without_topic_is_rejected() {
        let mut params = BTreeMap::new();
        params.insert("brokers".into(), json!("localhost:9092"));
        let spec = build_source_spec(params);

        let factory = KafkaBridgeSourceFactory;
        let err = factory.validate_spec(&spec).expect_err("topic missing");
        assert!(format!("{err}").contains("kafka.topic"));
    }

    #[test]
    fn sink_endpoint_from_spec_parses_fields() {
        let mut params = BTreeMap::new();
        params.insert("brokers".into(), json!("localhost:9092"));
        params.insert("topic".into(), json!("sink-topic"));
        params.insert("producer_type".into(), json!("async"));
        params.insert("fmt".into(), json!("csv"));
        params.insert("batch_size".into(), json!(500));
        let spec = build_sink_spec(params);

        let conf = build_sink_endpoint(&spec).expect("valid sink spec");
        assert_eq!(conf.topic, "sink-topic");
        assert_eq!(conf.producer_type, DeliveryMode::Async);
        assert_eq!(conf.serializer_format(), "csv");
        assert_eq!(conf.batch_size, 500);
    }

    #[test]
    fn sink_spec_with_invalid_serializer_is_rejected() {
        let mut params = BTreeMap::new();
        params.insert("topic".into(), json!("sink-topic"));
        params.insert("serializer".into(), json!("bad"));
        let spec = build_sink_spec(params);

        let factory = KafkaBridgeSinkFactory;
        let err = factory.validate_spec(&spec).expect_err("invalid serializer");
        assert!(format!("{err}").contains("invalid serializer"));
    }

    #[test]
    fn spec_tags_split_pairs_and_skip_blanks() {
        let tags = spec_tags(&[
            "env = prod".to_string(),
            "edge".to_string(),
            "  ".to_string(),
            "=orphan".to_string(),
        ]);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tags.get("edge"), Some(""));
    }

    #[test]
    fn connector_defs_expose_defaults_that_validate() {
        let src = KafkaBridgeSourceFactory.source_def();
        assert!(src.allow_override.contains(&"group_id".to_string()));
        assert!(EndpointConfig::from_params(&src.default_params).is_ok());

        let sink = KafkaBridgeSinkFactory.sink_def();
        assert!(sink.allow_override.contains(&"producer_type".to_string()));
        assert!(EndpointConfig::from_params(&sink.default_params).is_ok());
    }
}
