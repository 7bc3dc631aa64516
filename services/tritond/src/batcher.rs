//! Per-stream batch accumulation.
//!
//! Records arriving from the receiver are grouped by stream name and
//! flushed to the sink when a stream's batch reaches the per-call limit
//! or when the periodic tick fires.  A failed flush drops the batch
//! with loud logging; the non-blocking path is not durable by design.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};
use triton::backend::PackedRecord;

use crate::sink::Sink;

/// Flush a stream's batch once it holds this many records (the
/// partitioned-log per-call cap).
pub const FLUSH_MAX_RECORDS: usize = 500;

/// Default periodic flush tick.
pub const FLUSH_INTERVAL_MS: u64 = 100;

pub struct Batcher {
    sink: Arc<dyn Sink>,
    max_records: usize,
    pending: HashMap<String, Vec<PackedRecord>>,
}

impl Batcher {
    pub fn new(sink: Arc<dyn Sink>, max_records: usize) -> Self {
        Batcher {
            sink,
            max_records,
            pending: HashMap::new(),
        }
    }

    /// Accumulate one record, flushing its stream when the batch is
    /// full.
    pub async fn push(&mut self, stream_name: String, record: PackedRecord) {
        let batch = self.pending.entry(stream_name.clone()).or_default();
        batch.push(record);
        if batch.len() >= self.max_records
            && let Some(records) = self.pending.remove(&stream_name)
        {
            self.flush_stream(&stream_name, records).await;
        }
    }

    /// Flush every accumulated batch (the periodic tick, and shutdown).
    pub async fn flush_all(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (name, records) in pending {
            self.flush_stream(&name, records).await;
        }
    }

    /// Records currently buffered for a stream.
    pub fn pending_len(&self, stream_name: &str) -> usize {
        self.pending.get(stream_name).map_or(0, Vec::len)
    }

    async fn flush_stream(&self, name: &str, records: Vec<PackedRecord>) {
        let count = records.len();
        debug!(stream = name, count, "flushing batch");
        if let Err(e) = self.sink.flush(name, records).await {
            error!(
                stream = name,
                count,
                error = %e,
                "dropping batch after sink failure"
            );
        }
    }
}
