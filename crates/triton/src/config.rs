//! Stream configuration and environment wiring.
//!
//! The configuration document, already parsed into a YAML value by the
//! caller, maps each logical stream name to a provider entry, or to a
//! list of entries for a composite stream.  Entries are validated here
//! and turned into live streams through a [`BackendFactory`], the seam
//! behind which the concrete cloud SDKs live.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::backend::{PackedRecord, StreamBackend};
use crate::composite::CompositeStream;
use crate::errors::{BackendError, TritonError};
use crate::pubsub::{PubSubBackend, PubSubTransport};
use crate::record::RecordData;
use crate::stream::Stream;

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

pub const ENV_TRITON_ZMQ_HOST: &str = "TRITON_ZMQ_HOST";
pub const ENV_TRITON_ZMQ_PORT: &str = "TRITON_ZMQ_PORT";
pub const ENV_TRITON_DB: &str = "TRITON_DB";
pub const ENV_TRITON_CLIENT_NAME: &str = "TRITON_CLIENT_NAME";

pub const ZMQ_DEFAULT_HOST: &str = "127.0.0.1";
pub const ZMQ_DEFAULT_PORT: u16 = 3515;

/// The forwarder endpoint, `tcp://<host>:<port>`, from
/// `TRITON_ZMQ_HOST` / `TRITON_ZMQ_PORT` with defaults.
pub fn zmq_endpoint() -> String {
    let host =
        std::env::var(ENV_TRITON_ZMQ_HOST).unwrap_or_else(|_| ZMQ_DEFAULT_HOST.to_owned());
    let port = std::env::var(ENV_TRITON_ZMQ_PORT)
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(ZMQ_DEFAULT_PORT);
    format!("tcp://{host}:{port}")
}

/// The relational DSN used for checkpointing (`TRITON_DB`).
pub fn db_dsn() -> Option<String> {
    std::env::var(ENV_TRITON_DB).ok().filter(|s| !s.is_empty())
}

/// The per-process client identity (`TRITON_CLIENT_NAME`).
pub fn client_name() -> Option<String> {
    std::env::var(ENV_TRITON_CLIENT_NAME)
        .ok()
        .filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Config document
// ---------------------------------------------------------------------------

/// A partitioned-log stream entry: physical name, partition-key field,
/// optional region hint for the SDK layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedLogEntry {
    pub name: String,
    pub partition_key: String,
    pub region: Option<String>,
}

/// A pub/sub stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubEntry {
    pub project: String,
    pub topic: String,
    pub private_key_file: Option<String>,
    pub partition_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEntry {
    PartitionedLog(PartitionedLogEntry),
    PubSub(PubSubEntry),
}

/// One logical stream: a single entry or a composite list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamConfig {
    Single(StreamEntry),
    Composite(Vec<StreamEntry>),
}

impl StreamConfig {
    /// The partition-key field used when framing records for this
    /// stream (a composite uses its first child's).
    pub fn partition_key_field(&self) -> Option<&str> {
        let entry = match self {
            StreamConfig::Single(entry) => entry,
            StreamConfig::Composite(entries) => entries.first()?,
        };
        match entry {
            StreamEntry::PartitionedLog(e) => Some(&e.partition_key),
            StreamEntry::PubSub(e) => e.partition_key.as_deref(),
        }
    }
}

/// The validated configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TritonConfig {
    streams: BTreeMap<String, StreamConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    provider: Option<String>,
    name: Option<String>,
    partition_key: Option<String>,
    region: Option<String>,
    project: Option<String>,
    topic: Option<String>,
    private_key_file: Option<String>,
}

impl TritonConfig {
    /// Validate a parsed YAML document.
    pub fn from_value(doc: &serde_yaml::Value) -> Result<Self, TritonError> {
        let mapping = doc.as_mapping().ok_or_else(|| {
            TritonError::InvalidConfiguration("document is not a mapping".to_owned())
        })?;

        let mut streams = BTreeMap::new();
        for (key, value) in mapping {
            let stream_name = key.as_str().ok_or_else(|| {
                TritonError::InvalidConfiguration(format!("non-string stream name: {key:?}"))
            })?;
            let config = match value {
                serde_yaml::Value::Sequence(items) => {
                    let entries = items
                        .iter()
                        .map(|item| parse_entry(stream_name, item))
                        .collect::<Result<Vec<_>, _>>()?;
                    if entries.is_empty() {
                        return Err(TritonError::InvalidConfiguration(format!(
                            "stream '{stream_name}': composite entry is empty"
                        )));
                    }
                    StreamConfig::Composite(entries)
                }
                other => StreamConfig::Single(parse_entry(stream_name, other)?),
            };
            streams.insert(stream_name.to_owned(), config);
        }
        Ok(TritonConfig { streams })
    }

    pub fn get(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.get(name)
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }
}

fn parse_entry(stream_name: &str, value: &serde_yaml::Value) -> Result<StreamEntry, TritonError> {
    let raw: RawEntry = serde_yaml::from_value(value.clone()).map_err(|e| {
        TritonError::InvalidConfiguration(format!("stream '{stream_name}': {e}"))
    })?;

    let missing = |key: &str| {
        TritonError::InvalidConfiguration(format!("stream '{stream_name}': missing key '{key}'"))
    };

    match raw.provider.as_deref() {
        None | Some("aws") => Ok(StreamEntry::PartitionedLog(PartitionedLogEntry {
            name: raw.name.ok_or_else(|| missing("name"))?,
            partition_key: raw.partition_key.ok_or_else(|| missing("partition_key"))?,
            region: raw.region,
        })),
        Some("gcp") => Ok(StreamEntry::PubSub(PubSubEntry {
            project: raw.project.ok_or_else(|| missing("project"))?,
            topic: raw.topic.ok_or_else(|| missing("topic"))?,
            private_key_file: raw.private_key_file,
            partition_key: raw.partition_key,
        })),
        Some(other) => Err(TritonError::InvalidConfiguration(format!(
            "stream '{stream_name}': unknown provider '{other}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Stream construction
// ---------------------------------------------------------------------------

/// Turns validated entries into live backend handles.  Implemented by
/// the embedding application over its cloud SDKs; tests use in-memory
/// implementations.
pub trait BackendFactory: Send + Sync {
    fn partitioned_log(
        &self,
        entry: &PartitionedLogEntry,
    ) -> Result<Arc<dyn StreamBackend>, TritonError>;

    fn pubsub(&self, entry: &PubSubEntry) -> Result<Arc<dyn PubSubTransport>, TritonError>;
}

/// A single or composite stream, behind one producer surface.
pub enum AnyStream {
    Single(Stream),
    Composite(CompositeStream),
}

impl AnyStream {
    pub async fn put(&self, data: &RecordData) -> Result<(String, String), TritonError> {
        match self {
            AnyStream::Single(s) => s.put(data).await,
            AnyStream::Composite(c) => {
                let acks = c.put_many(std::slice::from_ref(data)).await?;
                acks.into_iter().next().ok_or_else(|| {
                    BackendError::other("composite put returned no acknowledgement").into()
                })
            }
        }
    }

    pub async fn put_many(
        &self,
        records: &[RecordData],
    ) -> Result<Vec<(String, String)>, TritonError> {
        match self {
            AnyStream::Single(s) => s.put_many(records).await,
            AnyStream::Composite(c) => c.put_many(records).await,
        }
    }

    pub async fn put_many_packed(
        &self,
        records: &[PackedRecord],
    ) -> Result<Vec<(String, String)>, TritonError> {
        match self {
            AnyStream::Single(s) => s.put_many_packed(records).await,
            AnyStream::Composite(c) => c.put_many_packed(records).await,
        }
    }

    pub fn as_single(&self) -> Option<&Stream> {
        match self {
            AnyStream::Single(s) => Some(s),
            AnyStream::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeStream> {
        match self {
            AnyStream::Composite(c) => Some(c),
            AnyStream::Single(_) => None,
        }
    }
}

/// Look up `name` in the configuration and build its stream through the
/// factory.
pub fn get_stream(
    name: &str,
    config: &TritonConfig,
    factory: &dyn BackendFactory,
) -> Result<AnyStream, TritonError> {
    let stream_config = config
        .get(name)
        .ok_or_else(|| TritonError::StreamNotConfigured(name.to_owned()))?;
    match stream_config {
        StreamConfig::Single(entry) => Ok(AnyStream::Single(build_stream(entry, factory)?)),
        StreamConfig::Composite(entries) => {
            let streams = entries
                .iter()
                .map(|entry| build_stream(entry, factory))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AnyStream::Composite(CompositeStream::new(streams)))
        }
    }
}

fn build_stream(entry: &StreamEntry, factory: &dyn BackendFactory) -> Result<Stream, TritonError> {
    match entry {
        StreamEntry::PartitionedLog(e) => {
            let backend = factory.partitioned_log(e)?;
            Ok(Stream::new(backend, e.name.clone(), e.partition_key.clone()))
        }
        StreamEntry::PubSub(e) => {
            let transport = factory.pubsub(e)?;
            let backend = Arc::new(PubSubBackend::new(transport, e.topic.clone()));
            Ok(Stream::with_parts(
                backend,
                e.topic.clone(),
                e.partition_key.clone(),
                crate::retry::RetryPolicy::default(),
                None,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<TritonConfig, TritonError> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        TritonConfig::from_value(&doc)
    }

    /// Test: a partitioned-log entry with the required keys parses.
    #[test]
    fn partitioned_log_entry() {
        let config = parse(
            "my_stream:\n  name: my_stream_v2\n  partition_key: value\n  region: us-west-1\n",
        )
        .unwrap();
        match config.get("my_stream") {
            Some(StreamConfig::Single(StreamEntry::PartitionedLog(e))) => {
                assert_eq!(e.name, "my_stream_v2");
                assert_eq!(e.partition_key, "value");
                assert_eq!(e.region.as_deref(), Some("us-west-1"));
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    /// Test: a missing required key names the stream and the key.
    #[test]
    fn missing_partition_key() {
        let err = parse("my_stream:\n  name: my_stream_v2\n").unwrap_err();
        match err {
            TritonError::InvalidConfiguration(msg) => {
                assert!(msg.contains("my_stream"));
                assert!(msg.contains("partition_key"));
            }
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    /// Test: a gcp entry requires project and topic.
    #[test]
    fn gcp_entry() {
        let config = parse(
            "events:\n  provider: gcp\n  project: integration\n  topic: foobar\n  private_key_file: /etc/key.json\n",
        )
        .unwrap();
        match config.get("events") {
            Some(StreamConfig::Single(StreamEntry::PubSub(e))) => {
                assert_eq!(e.project, "integration");
                assert_eq!(e.topic, "foobar");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    /// Test: an unknown provider is rejected.
    #[test]
    fn unknown_provider() {
        let err = parse("events:\n  provider: azure\n  topic: foo\n").unwrap_err();
        assert!(matches!(err, TritonError::InvalidConfiguration(_)));
    }

    /// Test: a list entry parses as a composite.
    #[test]
    fn composite_entry() {
        let config = parse(
            "multi:\n- name: my_kinesis_stream\n  partition_key: value\n- provider: gcp\n  project: p\n  topic: t\n  partition_key: value\n",
        )
        .unwrap();
        match config.get("multi") {
            Some(StreamConfig::Composite(entries)) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(config.get("multi").unwrap().partition_key_field(), Some("value"));
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    /// Test: the endpoint defaults when the environment is unset.
    #[test]
    fn zmq_endpoint_defaults() {
        // Env vars are process-global; only assert the shape.
        let endpoint = zmq_endpoint();
        assert!(endpoint.starts_with("tcp://"));
    }
}
