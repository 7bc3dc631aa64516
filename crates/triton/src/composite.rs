//! Composite streams: best-effort multicast over several backends.
//!
//! Publication fans the same batch out to every child in order.  If a
//! child fails, the error propagates and earlier children keep the
//! records they already accepted, so consumers of one backend may observe
//! records that never appear in another.  No rollback, no atomicity, no
//! cross-backend ordering.

use tracing::warn;

use crate::backend::PackedRecord;
use crate::errors::TritonError;
use crate::iterator::CombinedIterator;
use crate::record::{Record, RecordData};
use crate::stream::Stream;

/// An ordered fan-out over child streams.
pub struct CompositeStream {
    streams: Vec<Stream>,
}

impl CompositeStream {
    pub fn new(streams: Vec<Stream>) -> Self {
        CompositeStream { streams }
    }

    pub fn streams(&self) -> &[Stream] {
        &self.streams
    }

    /// Publish a batch to every child in order.
    ///
    /// Returns the first child's acknowledgements.  The first failing
    /// child aborts the fan-out; earlier children are not rolled back.
    pub async fn put_many(
        &self,
        records: &[RecordData],
    ) -> Result<Vec<(String, String)>, TritonError> {
        let mut first_acks = None;
        for stream in &self.streams {
            let acks = stream.put_many(records).await.inspect_err(|e| {
                warn!(
                    stream = %stream.name(),
                    error = %e,
                    "composite child failed; earlier children keep their records"
                );
            })?;
            if first_acks.is_none() {
                first_acks = Some(acks);
            }
        }
        Ok(first_acks.unwrap_or_default())
    }

    /// The already-encoded fan-out path.
    pub async fn put_many_packed(
        &self,
        records: &[PackedRecord],
    ) -> Result<Vec<(String, String)>, TritonError> {
        let mut first_acks = None;
        for stream in &self.streams {
            let acks = stream.put_many_packed(records).await?;
            if first_acks.is_none() {
                first_acks = Some(acks);
            }
        }
        Ok(first_acks.unwrap_or_default())
    }

    pub async fn build_iterator_from_latest(&self) -> Result<CompositeIterator, TritonError> {
        let mut children = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            children.push(stream.build_iterator_from_latest(&[]).await?);
        }
        Ok(CompositeIterator { children })
    }

    pub async fn build_iterator_from_checkpoint(&self) -> Result<CompositeIterator, TritonError> {
        let mut children = Vec::with_capacity(self.streams.len());
        for stream in &self.streams {
            children.push(stream.build_iterator_from_checkpoint(&[]).await?);
        }
        Ok(CompositeIterator { children })
    }
}

/// A zip of per-child combined iterators.
///
/// Each row aligns with the composite's child order and continues while
/// any child yields; children with nothing ready contribute `None`
/// (zip-longest; composite publication is lossy, so children drift).
pub struct CompositeIterator {
    children: Vec<CombinedIterator>,
}

impl CompositeIterator {
    pub fn children(&self) -> &[CombinedIterator] {
        &self.children
    }

    /// The next row, one slot per child.  `None` when an entire pass
    /// over every child came up dry.
    pub async fn next_row(&mut self) -> Result<Option<Vec<Option<Record>>>, TritonError> {
        let mut row = Vec::with_capacity(self.children.len());
        let mut any = false;
        for child in &mut self.children {
            let record = child.try_next_record().await?;
            any |= record.is_some();
            row.push(record);
        }
        if any { Ok(Some(row)) } else { Ok(None) }
    }

    pub fn stop(&mut self) {
        for child in &mut self.children {
            child.stop();
        }
    }

    pub async fn checkpoint(&self) -> Result<(), TritonError> {
        for child in &self.children {
            child.checkpoint().await?;
        }
        Ok(())
    }
}
