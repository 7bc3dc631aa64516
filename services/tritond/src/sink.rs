//! Where re-batched records go.
//!
//! `StreamSink` is the production path: it resolves a producer per
//! stream name from the configuration document and writes through the
//! packed batch path.  `DebugSink` appends the stream name and raw
//! record bodies to a file as MessagePack, for local development and
//! load testing without a backend.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use triton::backend::PackedRecord;
use triton::config::{AnyStream, BackendFactory, TritonConfig, get_stream};
use triton::errors::TritonError;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Triton(#[from] TritonError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

/// Receives one flushed per-stream batch at a time.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn flush(&self, stream_name: &str, records: Vec<PackedRecord>)
    -> Result<(), SinkError>;
}

/// Dispatches batches through the producer's packed path.
pub struct StreamSink {
    config: TritonConfig,
    factory: Arc<dyn BackendFactory>,
    streams: Mutex<HashMap<String, Arc<AnyStream>>>,
}

impl StreamSink {
    pub fn new(config: TritonConfig, factory: Arc<dyn BackendFactory>) -> Self {
        StreamSink {
            config,
            factory,
            streams: Mutex::new(HashMap::new()),
        }
    }

    async fn stream_for(&self, name: &str) -> Result<Arc<AnyStream>, TritonError> {
        let mut streams = self.streams.lock().await;
        if let Some(stream) = streams.get(name) {
            return Ok(stream.clone());
        }
        let stream = Arc::new(get_stream(name, &self.config, self.factory.as_ref())?);
        streams.insert(name.to_owned(), stream.clone());
        Ok(stream)
    }
}

#[async_trait]
impl Sink for StreamSink {
    async fn flush(
        &self,
        stream_name: &str,
        records: Vec<PackedRecord>,
    ) -> Result<(), SinkError> {
        let stream = self.stream_for(stream_name).await?;
        stream.put_many_packed(&records).await?;
        Ok(())
    }
}

/// Appends `msgpack(stream_name)` followed by the raw record bodies.
///
/// The resulting file is a plain MessagePack stream: a string switches
/// the current stream, maps are its records.
pub struct DebugSink {
    file: std::sync::Mutex<File>,
    path: PathBuf,
}

impl DebugSink {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(DebugSink {
            file: std::sync::Mutex::new(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for DebugSink {
    async fn flush(
        &self,
        stream_name: &str,
        records: Vec<PackedRecord>,
    ) -> Result<(), SinkError> {
        let mut buf = rmp_serde::to_vec(stream_name)?;
        for record in &records {
            buf.extend_from_slice(&record.data);
        }
        let mut file = self.file.lock().expect("debug sink lock");
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }
}
