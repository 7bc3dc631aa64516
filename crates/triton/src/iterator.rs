//! Reading: per-shard cursor iterators and the multi-shard scheduler.
//!
//! A [`ShardIterator`] owns one shard's opaque cursor, acquired lazily
//! on the first call that needs it, and an internal buffer of decoded
//! records.  A [`CombinedIterator`] owns a set of shard iterators and
//! schedules fills round-robin, in insertion order, with a global poll
//! floor so empty shards are not hammered.
//!
//! Iterators are single-consumer; sharing one across concurrent readers
//! is not supported.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::CursorStart;
use crate::codec;
use crate::errors::{BackendErrorKind, TritonError};
use crate::record::Record;
use crate::stream::Stream;

/// No fill cycle starts less than this long after the previous cycle
/// started.  The first cycle is not throttled.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where an iterator begins reading its shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IteratorStart {
    Latest,
    TrimHorizon,
    FromSeqNum(String),
    /// Resolved against the stream's checkpoint store on first use;
    /// falls back to `TrimHorizon` when nothing was stored.
    FromCheckpoint,
}

impl IteratorStart {
    fn as_cursor_start(&self) -> Option<CursorStart<'_>> {
        match self {
            IteratorStart::Latest => Some(CursorStart::Latest),
            IteratorStart::TrimHorizon => Some(CursorStart::TrimHorizon),
            IteratorStart::FromSeqNum(seq) => Some(CursorStart::AfterSequenceNumber(seq)),
            IteratorStart::FromCheckpoint => None,
        }
    }
}

// ---------------------------------------------------------------------------
// ShardIterator
// ---------------------------------------------------------------------------

/// Reads one shard of one stream.
pub struct ShardIterator {
    stream: Stream,
    shard_id: String,
    start: IteratorStart,
    fallback: IteratorStart,
    /// The opaque backend cursor.  `None` until first acquisition.
    iter_value: Option<String>,
    buffer: VecDeque<Record>,
    /// Set when the buffer ran dry; the next read attempts a fill.
    empty: bool,
    last_seq_num: Option<String>,
    /// Telemetry: how far this shard's reads lag the tip.
    behind_latest_secs: Option<f64>,
    closed: bool,
}

impl ShardIterator {
    pub(crate) fn new(stream: Stream, shard_id: String, start: IteratorStart) -> Self {
        ShardIterator {
            stream,
            shard_id,
            start,
            fallback: IteratorStart::TrimHorizon,
            iter_value: None,
            buffer: VecDeque::new(),
            empty: true,
            last_seq_num: None,
            behind_latest_secs: None,
            closed: false,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn start(&self) -> &IteratorStart {
        &self.start
    }

    pub fn last_seq_num(&self) -> Option<&str> {
        self.last_seq_num.as_deref()
    }

    pub fn behind_latest_secs(&self) -> Option<f64> {
        self.behind_latest_secs
    }

    /// Whether the backend has closed this shard (split/merge).
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolve the start position and acquire a cursor if we have none.
    async fn ensure_cursor(&mut self) -> Result<String, TritonError> {
        if let Some(cursor) = &self.iter_value {
            return Ok(cursor.clone());
        }

        if self.start == IteratorStart::FromCheckpoint {
            let store = self.stream.checkpoint_store().ok_or_else(|| {
                TritonError::CheckpointConfig(
                    "stream has no checkpoint store configured".to_owned(),
                )
            })?;
            self.start = match store.last_sequence_number(&self.shard_id).await? {
                Some(seq) => IteratorStart::FromSeqNum(seq),
                None => self.fallback.clone(),
            };
        }

        info!(
            stream = %self.stream.name(),
            shard = %self.shard_id,
            start = ?self.start,
            "acquiring shard cursor"
        );
        let start = self
            .start
            .as_cursor_start()
            .ok_or_else(|| TritonError::CheckpointConfig("unresolved checkpoint start".to_owned()))?;
        let cursor = self
            .stream
            .backend()
            .get_cursor(self.stream.name(), &self.shard_id, start)
            .await?;
        self.iter_value = Some(cursor.clone());
        Ok(cursor)
    }

    /// Request the next page and append decoded records to the buffer.
    ///
    /// A throughput-exceeded response logs loudly and returns without
    /// advancing, so the next call retries with the same cursor.  A
    /// missing next cursor closes the shard and signals `EndOfShard`
    /// (records decoded from the final page stay buffered).
    pub async fn fill(&mut self) -> Result<(), TritonError> {
        if self.closed {
            return Err(TritonError::EndOfShard);
        }
        let cursor = self.ensure_cursor().await?;

        let page = match self.stream.backend().get_records(&cursor).await {
            Ok(page) => page,
            Err(e) if e.kind == BackendErrorKind::ThroughputExceeded => {
                tracing::error!(
                    stream = %self.stream.name(),
                    shard = %self.shard_id,
                    "rate exceeded"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let behind_secs = page.millis_behind_latest as f64 / 1000.0;
        debug!(
            records = page.records.len(),
            shard = %self.shard_id,
            behind_secs,
            "filled shard buffer"
        );
        match self.behind_latest_secs {
            None => {
                info!(
                    stream = %self.stream.name(),
                    shard = %self.shard_id,
                    behind_secs,
                    "behind latest"
                );
            }
            Some(prev) if prev > 0.0 && behind_secs == 0.0 => {
                info!(
                    stream = %self.stream.name(),
                    shard = %self.shard_id,
                    "caught up with latest"
                );
            }
            Some(_) => {}
        }
        self.behind_latest_secs = Some(behind_secs);

        for raw in page.records {
            let body = match self.stream.payload_armor() {
                crate::backend::PayloadArmor::None => raw.data.to_vec(),
                crate::backend::PayloadArmor::Base64 => codec::unarmor(&raw.data)?,
            };
            let data = codec::decode(&body)?;
            self.buffer.push_back(Record {
                shard_id: self.shard_id.clone(),
                seq_num: raw.seq_num,
                data,
            });
            self.empty = false;
        }

        match page.next_cursor {
            Some(next) => {
                self.iter_value = Some(next);
                Ok(())
            }
            None => {
                // No follow-up cursor: the shard ended in a split or
                // merge.
                self.closed = true;
                Err(TritonError::EndOfShard)
            }
        }
    }

    /// Deliver the head of the buffer, filling first when the previous
    /// call ran the buffer dry.  Returns `None` when the buffer empties;
    /// calling again resumes after a future fill.
    pub async fn next_record(&mut self) -> Result<Option<Record>, TritonError> {
        if self.empty {
            self.fill().await?;
        }
        match self.buffer.pop_front() {
            Some(record) => {
                self.last_seq_num = Some(record.seq_num.clone());
                Ok(Some(record))
            }
            None => {
                self.empty = true;
                Ok(None)
            }
        }
    }

    /// One scheduler visit: at most one fill, then hand over everything
    /// buffered.  `EndOfShard` closes the iterator but still returns the
    /// final records.
    pub(crate) async fn drain(&mut self) -> Result<Vec<Record>, TritonError> {
        if self.empty {
            match self.fill().await {
                Ok(()) => {}
                Err(TritonError::EndOfShard) => {
                    warn!(
                        stream = %self.stream.name(),
                        shard = %self.shard_id,
                        "shard closed by the backend"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let mut out = Vec::with_capacity(self.buffer.len());
        while let Some(record) = self.buffer.pop_front() {
            self.last_seq_num = Some(record.seq_num.clone());
            out.push(record);
        }
        self.empty = true;
        Ok(out)
    }

    /// Write this iterator's own high-water mark through the stream's
    /// checkpoint store.
    pub async fn checkpoint(&self) -> Result<(), TritonError> {
        self.checkpoint_at(self.last_seq_num.as_deref()).await
    }

    async fn checkpoint_at(&self, seq_num: Option<&str>) -> Result<(), TritonError> {
        let Some(seq_num) = seq_num else {
            return Ok(());
        };
        let store = self.stream.checkpoint_store().ok_or_else(|| {
            TritonError::CheckpointConfig("stream has no checkpoint store configured".to_owned())
        })?;
        store.checkpoint(&self.shard_id, seq_num).await
    }
}

// ---------------------------------------------------------------------------
// CombinedIterator
// ---------------------------------------------------------------------------

/// Round-robin scheduler over a set of shard iterators.
///
/// Delivery rules, in priority order: records already buffered here are
/// delivered before any new fill; a fill cycle visits every open child
/// exactly once, in insertion order, before the cycle restarts; cycles
/// start at least [`MIN_POLL_INTERVAL`] apart (the first is free).
pub struct CombinedIterator {
    children: Vec<ShardIterator>,
    /// Child indices still to visit in the current fill cycle.
    fill_queue: VecDeque<usize>,
    buffer: VecDeque<Record>,
    running: bool,
    last_cycle_started: Option<Instant>,
    /// Seq and shard of the most recent record handed to the consumer.
    last_seq_num: Option<String>,
    last_shard: Option<String>,
}

impl CombinedIterator {
    pub(crate) fn new(children: Vec<ShardIterator>) -> Self {
        CombinedIterator {
            children,
            fill_queue: VecDeque::new(),
            buffer: VecDeque::new(),
            running: true,
            last_cycle_started: None,
            last_seq_num: None,
            last_shard: None,
        }
    }

    pub fn iterators(&self) -> &[ShardIterator] {
        &self.children
    }

    pub fn last_seq_num(&self) -> Option<&str> {
        self.last_seq_num.as_deref()
    }

    /// Cooperative cancellation: subsequent reads drain the buffer and
    /// then end without starting another fill.
    pub fn stop(&mut self) {
        self.running = false;
    }

    fn open_children(&self) -> usize {
        self.children.iter().filter(|c| !c.is_closed()).count()
    }

    fn pop_buffered(&mut self) -> Option<Record> {
        let record = self.buffer.pop_front()?;
        self.last_seq_num = Some(record.seq_num.clone());
        self.last_shard = Some(record.shard_id.clone());
        Some(record)
    }

    /// Wait out the poll floor, measured cycle start to cycle start.
    async fn throttle(&mut self) {
        if let Some(started) = self.last_cycle_started {
            let elapsed = started.elapsed();
            if elapsed < MIN_POLL_INTERVAL {
                let wait = MIN_POLL_INTERVAL - elapsed;
                debug!(?wait, "throttling before next fill cycle");
                tokio::time::sleep(wait).await;
            }
        }
        self.last_cycle_started = Some(Instant::now());
    }

    /// Visit one child: begin a new cycle when the previous one is
    /// exhausted, then fill and drain the next child in order.
    async fn fill_once(&mut self) -> Result<(), TritonError> {
        if self.fill_queue.is_empty() {
            self.throttle().await;
            let open = (0..self.children.len()).filter(|&i| !self.children[i].is_closed());
            self.fill_queue.extend(open);
        }
        let Some(idx) = self.fill_queue.pop_front() else {
            return Ok(());
        };
        debug!(shard = %self.children[idx].shard_id(), "checking shard");
        let records = self.children[idx].drain().await?;
        self.buffer.extend(records);
        Ok(())
    }

    /// Deliver the next record, polling the children until one produces
    /// or the iterator is stopped / out of open shards.
    pub async fn next_record(&mut self) -> Result<Option<Record>, TritonError> {
        loop {
            if let Some(record) = self.pop_buffered() {
                return Ok(Some(record));
            }
            if !self.running || self.open_children() == 0 {
                return Ok(None);
            }
            self.fill_once().await?;
        }
    }

    /// Deliver the next record if at most one full fill cycle surfaces
    /// one; `None` means an entire cycle came up dry.
    ///
    /// This is the non-blocking flavor used when zipping composite
    /// children, where one starved child must not stall the rest.
    pub async fn try_next_record(&mut self) -> Result<Option<Record>, TritonError> {
        if let Some(record) = self.pop_buffered() {
            return Ok(Some(record));
        }
        if !self.running {
            return Ok(None);
        }
        let mut visits = self.open_children();
        while visits > 0 {
            self.fill_once().await?;
            if let Some(record) = self.pop_buffered() {
                return Ok(Some(record));
            }
            visits -= 1;
        }
        Ok(None)
    }

    /// Checkpoint every child.
    ///
    /// The child that produced the most recent delivered record is
    /// checkpointed at the combined iterator's own high-water mark,
    /// which may trail that child's internal buffer tip; every other
    /// child uses its own `last_seq_num`.  Children that have delivered
    /// nothing are skipped.
    pub async fn checkpoint(&self) -> Result<(), TritonError> {
        for child in &self.children {
            if Some(child.shard_id()) == self.last_shard.as_deref() {
                child.checkpoint_at(self.last_seq_num.as_deref()).await?;
            } else {
                child.checkpoint().await?;
            }
        }
        Ok(())
    }
}
