/// StreamSink tests: config-driven dispatch through the producer's
/// packed path.
use std::sync::Arc;

use bytes::Bytes;
use triton::backend::PackedRecord;
use triton::config::TritonConfig;
use triton::record::record_data;
use triton_test_utils::MemoryFactory;
use tritond::sink::{Sink, StreamSink};

fn packed(value: i64) -> PackedRecord {
    let body = triton::codec::encode(&record_data([("value", value.into())])).unwrap();
    PackedRecord {
        data: Bytes::from(body),
        partition_key: value.to_string(),
    }
}

fn config() -> TritonConfig {
    let yaml = "events:\n  name: events_v1\n  partition_key: value\n";
    let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    TritonConfig::from_value(&doc).unwrap()
}

/// Test: a flushed batch lands in the configured backend stream.
#[tokio::test]
async fn flush_dispatches_to_configured_stream() {
    let factory = Arc::new(MemoryFactory::new());
    let sink = StreamSink::new(config(), factory.clone());

    sink.flush("events", vec![packed(1), packed(2), packed(3)])
        .await
        .unwrap();
    assert_eq!(factory.log("events_v1").len("0001"), 3);
}

/// Test: repeated flushes reuse the resolved stream.
#[tokio::test]
async fn flush_reuses_stream() {
    let factory = Arc::new(MemoryFactory::new());
    let sink = StreamSink::new(config(), factory.clone());

    sink.flush("events", vec![packed(1)]).await.unwrap();
    sink.flush("events", vec![packed(2)]).await.unwrap();
    assert_eq!(factory.log("events_v1").len("0001"), 2);
}

/// Test: an unconfigured stream name is an error the batcher will log
/// and drop on.
#[tokio::test]
async fn unconfigured_stream_is_an_error() {
    let factory = Arc::new(MemoryFactory::new());
    let sink = StreamSink::new(config(), factory);

    assert!(sink.flush("unknown", vec![packed(1)]).await.is_err());
}
