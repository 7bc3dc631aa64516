//! The capability surface the producer/consumer core is polymorphic
//! over.
//!
//! Two families implement this trait: partitioned-log services (explicit
//! shards, opaque sequence-number cursors, 500-entry batch writes) and
//! pub/sub services adapted through [`crate::pubsub::PubSubBackend`].
//! The concrete SDK call-layer lives behind implementations of this
//! trait and is out of scope for the core.

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::BackendError;

/// Hard per-call cap on batch writes against a partitioned log.
pub const PARTITIONED_LOG_BATCH_MAX: usize = 500;

/// An encoded record ready for the wire: codec output plus the partition
/// key that routes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRecord {
    pub data: Bytes,
    pub partition_key: String,
}

/// Acknowledgement of a single accepted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub shard_id: String,
    pub seq_num: String,
}

/// Per-entry outcome of a batch write, aligned with the input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Ok(PutAck),
    Err { code: String, message: String },
}

/// One page of shard identifiers.
///
/// `has_more` signals server-side pagination, which the core refuses to
/// follow rather than silently truncate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardListing {
    pub shard_ids: Vec<String>,
    pub has_more: bool,
}

/// Where a freshly acquired cursor starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStart<'a> {
    Latest,
    TrimHorizon,
    AfterSequenceNumber(&'a str),
}

impl CursorStart<'_> {
    /// The partitioned-log wire name for this start position.
    pub fn wire_name(&self) -> &'static str {
        match self {
            CursorStart::Latest => "LATEST",
            CursorStart::TrimHorizon => "TRIM_HORIZON",
            CursorStart::AfterSequenceNumber(_) => "AFTER_SEQUENCE_NUMBER",
        }
    }
}

/// A raw payload as stored by the backend: opaque sequence number plus
/// the (possibly armored) record body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub seq_num: String,
    pub data: Bytes,
}

/// One page of raw records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    /// Absent when the shard has closed (split/merge).
    pub next_cursor: Option<String>,
    pub millis_behind_latest: u64,
}

/// Whether record bodies must be base64-armored for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadArmor {
    #[default]
    None,
    Base64,
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    async fn put_record(
        &self,
        stream: &str,
        record: PackedRecord,
    ) -> Result<PutAck, BackendError>;

    async fn put_records(
        &self,
        stream: &str,
        records: &[PackedRecord],
    ) -> Result<Vec<PutOutcome>, BackendError>;

    async fn describe_shards(&self, stream: &str) -> Result<ShardListing, BackendError>;

    async fn get_cursor(
        &self,
        stream: &str,
        shard_id: &str,
        start: CursorStart<'_>,
    ) -> Result<String, BackendError>;

    async fn get_records(&self, cursor: &str) -> Result<RecordPage, BackendError>;

    /// Per-call cap on `put_records` entries.
    fn batch_max_records(&self) -> usize {
        PARTITIONED_LOG_BATCH_MAX
    }

    fn payload_armor(&self) -> PayloadArmor {
        PayloadArmor::None
    }
}
