//! An in-memory [`CheckpointStore`], used wherever the original suite
//! swapped its Postgres pool for SQLite.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use triton::checkpoint::CheckpointStore;
use triton::errors::TritonError;

#[derive(Default)]
pub struct MemoryCheckpointer {
    rows: Mutex<HashMap<String, (String, u64)>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous peek at a stored sequence number.
    pub fn stored(&self, shard_id: &str) -> Option<String> {
        let rows = self.rows.lock().unwrap();
        rows.get(shard_id).map(|(seq, _)| seq.clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointer {
    async fn checkpoint(&self, shard_id: &str, seq_num: &str) -> Result<(), TritonError> {
        let updated = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let mut rows = self.rows.lock().unwrap();
        rows.insert(shard_id.to_owned(), (seq_num.to_owned(), updated));
        Ok(())
    }

    async fn last_sequence_number(&self, shard_id: &str) -> Result<Option<String>, TritonError> {
        Ok(self.stored(shard_id))
    }
}
