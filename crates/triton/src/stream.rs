//! The producer: batched, retried writes to one logical stream.
//!
//! A `Stream` owns a backend handle, the configured partition-key field,
//! and a lazily discovered shard list.  Cloning is cheap and shares the
//! shard cache; the first observer populates it and concurrent observers
//! see it either empty or fully populated, never torn.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tracing::{info, warn};

use crate::backend::{PackedRecord, PayloadArmor, StreamBackend};
use crate::checkpoint::CheckpointStore;
use crate::codec;
use crate::errors::{BackendError, TritonError};
use crate::iterator::{CombinedIterator, IteratorStart, ShardIterator};
use crate::record::RecordData;
use crate::retry::RetryPolicy;

/// Partition keys must fit a 64-byte frame field.
pub const MAX_PARTITION_KEY_BYTES: usize = triton_wire::FIELD_WIDTH;

/// Re-submissions of individually rejected batch entries before the
/// aggregate call gives up.  Four backend calls total.
const PUT_MANY_RETRY_BUDGET: u32 = 3;

struct Inner {
    backend: Arc<dyn StreamBackend>,
    name: String,
    /// `None` for providers without partitioning (pub/sub).
    partition_key_field: Option<String>,
    shard_ids: OnceLock<Vec<String>>,
    retry: RetryPolicy,
    checkpoint: Option<Arc<dyn CheckpointStore>>,
}

/// A handle to one logical stream.
#[derive(Clone)]
pub struct Stream {
    inner: Arc<Inner>,
}

impl Stream {
    pub fn new(
        backend: Arc<dyn StreamBackend>,
        name: impl Into<String>,
        partition_key_field: impl Into<String>,
    ) -> Self {
        Self::with_parts(
            backend,
            name,
            Some(partition_key_field.into()),
            RetryPolicy::default(),
            None,
        )
    }

    pub fn with_parts(
        backend: Arc<dyn StreamBackend>,
        name: impl Into<String>,
        partition_key_field: Option<String>,
        retry: RetryPolicy,
        checkpoint: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Stream {
            inner: Arc::new(Inner {
                backend,
                name: name.into(),
                partition_key_field,
                shard_ids: OnceLock::new(),
                retry,
                checkpoint,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn backend(&self) -> &Arc<dyn StreamBackend> {
        &self.inner.backend
    }

    pub fn payload_armor(&self) -> PayloadArmor {
        self.inner.backend.payload_armor()
    }

    pub fn checkpoint_store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.inner.checkpoint.as_ref()
    }

    // -----------------------------------------------------------------------
    // Writing
    // -----------------------------------------------------------------------

    /// Write one record.  Returns `(shard_id, seq_num)`.
    pub async fn put(&self, data: &RecordData) -> Result<(String, String), TritonError> {
        let packed = self.pack(data)?;
        let packed = self.armored(&packed);
        let ack = self
            .inner
            .retry
            .run(|| self.inner.backend.put_record(&self.inner.name, packed.clone()))
            .await?;
        Ok((ack.shard_id, ack.seq_num))
    }

    /// Write a batch.  Acknowledgements come back in input order.
    pub async fn put_many(
        &self,
        records: &[RecordData],
    ) -> Result<Vec<(String, String)>, TritonError> {
        let packed = records
            .iter()
            .map(|r| self.pack(r))
            .collect::<Result<Vec<_>, _>>()?;
        self.put_many_packed(&packed).await
    }

    /// The already-encoded batch path, shared with tritond.
    ///
    /// Chunks the input by the backend's per-call cap.  Entries rejected
    /// inside an otherwise-successful call are re-submitted after a
    /// backoff sleep; once the re-submission budget runs out the call
    /// fails with `PutMany` carrying the unsent records.
    pub async fn put_many_packed(
        &self,
        records: &[PackedRecord],
    ) -> Result<Vec<(String, String)>, TritonError> {
        let cap = self.inner.backend.batch_max_records();
        let mut acks: Vec<Option<(String, String)>> = vec![None; records.len()];
        let mut pending: Vec<usize> = (0..records.len()).collect();
        let mut attempt: u32 = 0;

        while !pending.is_empty() {
            let mut rejected: Vec<usize> = Vec::new();
            for chunk in pending.chunks(cap) {
                let batch: Vec<PackedRecord> =
                    chunk.iter().map(|&i| self.armored(&records[i])).collect();
                let outcomes = self
                    .inner
                    .retry
                    .run(|| self.inner.backend.put_records(&self.inner.name, &batch))
                    .await?;
                if outcomes.len() != batch.len() {
                    return Err(BackendError::other(format!(
                        "batch write returned {} outcomes for {} entries",
                        outcomes.len(),
                        batch.len()
                    ))
                    .into());
                }
                for (&idx, outcome) in chunk.iter().zip(&outcomes) {
                    match outcome {
                        crate::backend::PutOutcome::Ok(ack) => {
                            acks[idx] = Some((ack.shard_id.clone(), ack.seq_num.clone()));
                        }
                        crate::backend::PutOutcome::Err { code, message } => {
                            warn!(
                                stream = %self.inner.name,
                                code,
                                message,
                                "batch entry rejected"
                            );
                            rejected.push(idx);
                        }
                    }
                }
            }

            if rejected.is_empty() {
                break;
            }
            if attempt >= PUT_MANY_RETRY_BUDGET {
                return Err(TritonError::PutMany {
                    failed: rejected.iter().map(|&i| records[i].clone()).collect(),
                });
            }
            let delay = self.inner.retry.delay(attempt);
            warn!(
                stream = %self.inner.name,
                rejected = rejected.len(),
                attempt,
                ?delay,
                "re-submitting rejected batch entries after backoff"
            );
            tokio::time::sleep(delay).await;
            pending = rejected;
            attempt += 1;
        }

        Ok(acks
            .into_iter()
            .map(|a| a.expect("every input entry acked or re-submitted"))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Shard discovery
    // -----------------------------------------------------------------------

    /// The ordered shard identifiers, fetched once and cached for the
    /// descriptor's lifetime.
    pub async fn shards(&self) -> Result<Vec<String>, TritonError> {
        if let Some(ids) = self.inner.shard_ids.get() {
            return Ok(ids.clone());
        }
        let listing = self
            .inner
            .backend
            .describe_shards(&self.inner.name)
            .await?;
        if listing.has_more {
            return Err(TritonError::UnimplementedPagination);
        }
        if listing.shard_ids.is_empty() {
            return Err(BackendError::other(format!(
                "stream '{}' reported no shards",
                self.inner.name
            ))
            .into());
        }
        info!(
            stream = %self.inner.name,
            shards = listing.shard_ids.len(),
            "discovered shards"
        );
        // On a race the first writer wins; the redundant fetch is benign.
        Ok(self
            .inner
            .shard_ids
            .get_or_init(|| listing.shard_ids)
            .clone())
    }

    /// Project shard indices into shard identifiers; empty means "all".
    pub async fn select_shards(&self, indices: &[usize]) -> Result<Vec<String>, TritonError> {
        let shard_ids = self.shards().await?;
        if indices.is_empty() {
            return Ok(shard_ids);
        }
        indices
            .iter()
            .map(|&i| {
                shard_ids
                    .get(i)
                    .cloned()
                    .ok_or(TritonError::ShardNotFound(i))
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Iterator construction
    // -----------------------------------------------------------------------

    pub async fn build_iterator_from_latest(
        &self,
        shard_indices: &[usize],
    ) -> Result<CombinedIterator, TritonError> {
        let shard_ids = self.select_shards(shard_indices).await?;
        Ok(self.build_iterator(IteratorStart::Latest, shard_ids))
    }

    pub async fn build_iterator_for_all(
        &self,
        shard_indices: &[usize],
    ) -> Result<CombinedIterator, TritonError> {
        let shard_ids = self.select_shards(shard_indices).await?;
        Ok(self.build_iterator(IteratorStart::TrimHorizon, shard_ids))
    }

    /// Read one shard starting after a known sequence number.
    pub fn build_iterator_from_seqnum(
        &self,
        shard_id: &str,
        seq_num: impl Into<String>,
    ) -> CombinedIterator {
        self.build_iterator(
            IteratorStart::FromSeqNum(seq_num.into()),
            vec![shard_id.to_owned()],
        )
    }

    /// Resume from the durable checkpoints of this stream's store.
    ///
    /// Shards without a stored cursor fall back to reading the whole
    /// shard.
    pub async fn build_iterator_from_checkpoint(
        &self,
        shard_indices: &[usize],
    ) -> Result<CombinedIterator, TritonError> {
        if self.inner.checkpoint.is_none() {
            return Err(TritonError::CheckpointConfig(
                "stream has no checkpoint store configured".to_owned(),
            ));
        }
        let shard_ids = self.select_shards(shard_indices).await?;
        Ok(self.build_iterator(IteratorStart::FromCheckpoint, shard_ids))
    }

    fn build_iterator(&self, start: IteratorStart, shard_ids: Vec<String>) -> CombinedIterator {
        let iterators = shard_ids
            .into_iter()
            .map(|shard_id| ShardIterator::new(self.clone(), shard_id, start.clone()))
            .collect();
        CombinedIterator::new(iterators)
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    fn pack(&self, data: &RecordData) -> Result<PackedRecord, TritonError> {
        let partition_key = self.partition_key(data)?;
        let body = codec::encode(data)?;
        Ok(PackedRecord {
            data: Bytes::from(body),
            partition_key,
        })
    }

    fn partition_key(&self, data: &RecordData) -> Result<String, TritonError> {
        let Some(field) = &self.inner.partition_key_field else {
            return Ok(String::new());
        };
        let value = data
            .get(field)
            .ok_or_else(|| TritonError::MissingPartitionKey(field.clone()))?;
        let key = value.to_string();
        if key.len() > MAX_PARTITION_KEY_BYTES {
            return Err(TritonError::PartitionKeyTooLong(key.len()));
        }
        Ok(key)
    }

    fn armored(&self, record: &PackedRecord) -> PackedRecord {
        match self.inner.backend.payload_armor() {
            PayloadArmor::None => record.clone(),
            PayloadArmor::Base64 => PackedRecord {
                data: Bytes::from(codec::armor(&record.data).into_bytes()),
                partition_key: record.partition_key.clone(),
            },
        }
    }
}
