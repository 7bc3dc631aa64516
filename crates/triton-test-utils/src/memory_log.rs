//! A semantic in-memory partitioned log.
//!
//! Behaves like a tiny real backend: per-shard append-only records with
//! numeric sequence numbers, opaque `shard@offset` cursors, paging, and
//! optional shard closure to exercise end-of-shard handling.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use triton::backend::{
    CursorStart, PackedRecord, PutAck, PutOutcome, RawRecord, RecordPage, ShardListing,
    StreamBackend,
};
use triton::errors::BackendError;
use triton::record::RecordData;

struct Shard {
    records: Vec<Bytes>,
    closed: bool,
}

struct LogState {
    shards: BTreeMap<String, Shard>,
    order: Vec<String>,
}

pub struct MemoryLogBackend {
    state: Mutex<LogState>,
    page_size: usize,
}

impl MemoryLogBackend {
    pub fn new(shard_ids: &[&str]) -> Self {
        let order: Vec<String> = shard_ids.iter().map(|s| (*s).to_owned()).collect();
        let shards = order
            .iter()
            .map(|id| {
                (
                    id.clone(),
                    Shard {
                        records: Vec::new(),
                        closed: false,
                    },
                )
            })
            .collect();
        MemoryLogBackend {
            state: Mutex::new(LogState { shards, order }),
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Append a record body directly to a shard, bypassing the producer.
    /// Returns the assigned sequence number.
    pub fn seed(&self, shard_id: &str, data: &RecordData) -> String {
        let body = Bytes::from(triton::codec::encode(data).expect("encodable test record"));
        self.append(shard_id, body)
    }

    /// Close a shard: once its records are consumed the backend stops
    /// issuing cursors, as after a split or merge.
    pub fn close_shard(&self, shard_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(shard) = state.shards.get_mut(shard_id) {
            shard.closed = true;
        }
    }

    pub fn len(&self, shard_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.shards.get(shard_id).map_or(0, |s| s.records.len())
    }

    pub fn is_empty(&self, shard_id: &str) -> bool {
        self.len(shard_id) == 0
    }

    fn append(&self, shard_id: &str, body: Bytes) -> String {
        let mut state = self.state.lock().unwrap();
        let shard = state
            .shards
            .entry(shard_id.to_owned())
            .or_insert_with(|| Shard {
                records: Vec::new(),
                closed: false,
            });
        let seq = shard.records.len();
        shard.records.push(body);
        seq.to_string()
    }

    fn route(&self, partition_key: &str) -> String {
        let state = self.state.lock().unwrap();
        let n = state.order.len().max(1);
        let slot = partition_key
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_add(usize::from(b)))
            % n;
        state
            .order
            .get(slot)
            .cloned()
            .unwrap_or_else(|| "0001".to_owned())
    }
}

fn parse_cursor(cursor: &str) -> Result<(String, usize), BackendError> {
    let (shard, offset) = cursor
        .rsplit_once('@')
        .ok_or_else(|| BackendError::other(format!("malformed cursor '{cursor}'")))?;
    let offset = offset
        .parse::<usize>()
        .map_err(|_| BackendError::other(format!("malformed cursor offset '{cursor}'")))?;
    Ok((shard.to_owned(), offset))
}

#[async_trait]
impl StreamBackend for MemoryLogBackend {
    async fn put_record(
        &self,
        _stream: &str,
        record: PackedRecord,
    ) -> Result<PutAck, BackendError> {
        let shard_id = self.route(&record.partition_key);
        let seq_num = self.append(&shard_id, record.data);
        Ok(PutAck { shard_id, seq_num })
    }

    async fn put_records(
        &self,
        _stream: &str,
        records: &[PackedRecord],
    ) -> Result<Vec<PutOutcome>, BackendError> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let shard_id = self.route(&record.partition_key);
            let seq_num = self.append(&shard_id, record.data.clone());
            outcomes.push(PutOutcome::Ok(PutAck { shard_id, seq_num }));
        }
        Ok(outcomes)
    }

    async fn describe_shards(&self, _stream: &str) -> Result<ShardListing, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(ShardListing {
            shard_ids: state.order.clone(),
            has_more: false,
        })
    }

    async fn get_cursor(
        &self,
        _stream: &str,
        shard_id: &str,
        start: CursorStart<'_>,
    ) -> Result<String, BackendError> {
        let state = self.state.lock().unwrap();
        let shard = state
            .shards
            .get(shard_id)
            .ok_or_else(|| BackendError::other(format!("unknown shard '{shard_id}'")))?;
        let offset = match start {
            CursorStart::Latest => shard.records.len(),
            CursorStart::TrimHorizon => 0,
            CursorStart::AfterSequenceNumber(seq) => {
                let seq = seq
                    .parse::<usize>()
                    .map_err(|_| BackendError::other(format!("bad sequence number '{seq}'")))?;
                seq + 1
            }
        };
        Ok(format!("{shard_id}@{offset}"))
    }

    async fn get_records(&self, cursor: &str) -> Result<RecordPage, BackendError> {
        let (shard_id, offset) = parse_cursor(cursor)?;
        let state = self.state.lock().unwrap();
        let shard = state
            .shards
            .get(&shard_id)
            .ok_or_else(|| BackendError::other(format!("unknown shard '{shard_id}'")))?;

        let end = (offset + self.page_size).min(shard.records.len());
        let records = shard.records[offset.min(end)..end]
            .iter()
            .enumerate()
            .map(|(i, data)| RawRecord {
                seq_num: (offset + i).to_string(),
                data: data.clone(),
            })
            .collect();

        let at_tip = end >= shard.records.len();
        let next_cursor = if shard.closed && at_tip {
            None
        } else {
            Some(format!("{shard_id}@{end}"))
        };
        Ok(RecordPage {
            records,
            next_cursor,
            millis_behind_latest: if at_tip { 0 } else { 1000 },
        })
    }
}
