//! A scripted [`StreamBackend`] for producer tests.
//!
//! Every operation delegates to a replaceable closure receiving the
//! zero-based call number, so tests can script per-call behavior
//! ("fail the first two calls, then succeed") the way the original
//! suite stubbed its connection objects.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use triton::backend::{
    CursorStart, PackedRecord, PayloadArmor, PutAck, PutOutcome, RecordPage, ShardListing,
    StreamBackend,
};
use triton::errors::BackendError;

type PutRecordFn =
    Box<dyn FnMut(usize, &PackedRecord) -> Result<PutAck, BackendError> + Send>;
type PutRecordsFn =
    Box<dyn FnMut(usize, &[PackedRecord]) -> Result<Vec<PutOutcome>, BackendError> + Send>;
type GetCursorFn = Box<dyn FnMut(&str, CursorStart<'_>) -> Result<String, BackendError> + Send>;
type GetRecordsFn = Box<dyn FnMut(usize, &str) -> Result<RecordPage, BackendError> + Send>;

pub struct MockBackend {
    shard_ids: Vec<String>,
    has_more_shards: bool,
    armor: PayloadArmor,
    batch_max: usize,
    put_record_fn: Mutex<PutRecordFn>,
    put_records_fn: Mutex<PutRecordsFn>,
    get_cursor_fn: Mutex<GetCursorFn>,
    get_records_fn: Mutex<GetRecordsFn>,
    put_record_calls: AtomicUsize,
    put_records_calls: AtomicUsize,
    get_records_calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        MockBackend {
            shard_ids: vec!["0001".to_owned()],
            has_more_shards: false,
            armor: PayloadArmor::None,
            batch_max: triton::backend::PARTITIONED_LOG_BATCH_MAX,
            put_record_fn: Mutex::new(Box::new(|_, _| {
                Ok(PutAck {
                    shard_id: "0001".to_owned(),
                    seq_num: "1".to_owned(),
                })
            })),
            put_records_fn: Mutex::new(Box::new(|_, records| {
                Ok(records
                    .iter()
                    .enumerate()
                    .map(|(i, _)| {
                        PutOutcome::Ok(PutAck {
                            shard_id: "0001".to_owned(),
                            seq_num: i.to_string(),
                        })
                    })
                    .collect())
            })),
            get_cursor_fn: Mutex::new(Box::new(|shard, _| Ok(format!("{shard}@cursor")))),
            get_records_fn: Mutex::new(Box::new(|_, cursor| {
                Ok(RecordPage {
                    records: Vec::new(),
                    next_cursor: Some(cursor.to_owned()),
                    millis_behind_latest: 0,
                })
            })),
            put_record_calls: AtomicUsize::new(0),
            put_records_calls: AtomicUsize::new(0),
            get_records_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_shards(mut self, shard_ids: &[&str]) -> Self {
        self.shard_ids = shard_ids.iter().map(|s| (*s).to_owned()).collect();
        self
    }

    pub fn with_more_shards(mut self) -> Self {
        self.has_more_shards = true;
        self
    }

    pub fn with_armor(mut self, armor: PayloadArmor) -> Self {
        self.armor = armor;
        self
    }

    pub fn with_batch_max(mut self, batch_max: usize) -> Self {
        self.batch_max = batch_max;
        self
    }

    pub fn on_put_record(
        self,
        f: impl FnMut(usize, &PackedRecord) -> Result<PutAck, BackendError> + Send + 'static,
    ) -> Self {
        *self.put_record_fn.lock().unwrap() = Box::new(f);
        self
    }

    pub fn on_put_records(
        self,
        f: impl FnMut(usize, &[PackedRecord]) -> Result<Vec<PutOutcome>, BackendError>
        + Send
        + 'static,
    ) -> Self {
        *self.put_records_fn.lock().unwrap() = Box::new(f);
        self
    }

    pub fn on_get_cursor(
        self,
        f: impl FnMut(&str, CursorStart<'_>) -> Result<String, BackendError> + Send + 'static,
    ) -> Self {
        *self.get_cursor_fn.lock().unwrap() = Box::new(f);
        self
    }

    pub fn on_get_records(
        self,
        f: impl FnMut(usize, &str) -> Result<RecordPage, BackendError> + Send + 'static,
    ) -> Self {
        *self.get_records_fn.lock().unwrap() = Box::new(f);
        self
    }

    pub fn put_record_calls(&self) -> usize {
        self.put_record_calls.load(Ordering::SeqCst)
    }

    pub fn put_records_calls(&self) -> usize {
        self.put_records_calls.load(Ordering::SeqCst)
    }

    pub fn get_records_calls(&self) -> usize {
        self.get_records_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamBackend for MockBackend {
    async fn put_record(
        &self,
        _stream: &str,
        record: PackedRecord,
    ) -> Result<PutAck, BackendError> {
        let call = self.put_record_calls.fetch_add(1, Ordering::SeqCst);
        (*self.put_record_fn.lock().unwrap())(call, &record)
    }

    async fn put_records(
        &self,
        _stream: &str,
        records: &[PackedRecord],
    ) -> Result<Vec<PutOutcome>, BackendError> {
        let call = self.put_records_calls.fetch_add(1, Ordering::SeqCst);
        (*self.put_records_fn.lock().unwrap())(call, records)
    }

    async fn describe_shards(&self, _stream: &str) -> Result<ShardListing, BackendError> {
        Ok(ShardListing {
            shard_ids: self.shard_ids.clone(),
            has_more: self.has_more_shards,
        })
    }

    async fn get_cursor(
        &self,
        _stream: &str,
        shard_id: &str,
        start: CursorStart<'_>,
    ) -> Result<String, BackendError> {
        (*self.get_cursor_fn.lock().unwrap())(shard_id, start)
    }

    async fn get_records(&self, cursor: &str) -> Result<RecordPage, BackendError> {
        let call = self.get_records_calls.fetch_add(1, Ordering::SeqCst);
        (*self.get_records_fn.lock().unwrap())(call, cursor)
    }

    fn batch_max_records(&self) -> usize {
        self.batch_max
    }

    fn payload_armor(&self) -> PayloadArmor {
        self.armor
    }
}
