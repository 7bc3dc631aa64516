//! Pub/sub backends adapted to the partitioned-log capability surface.
//!
//! A topic is modeled as a stream with one logical shard (the topic
//! itself).  The cursor is a subscription identifier: `LATEST` and
//! `TRIM_HORIZON` create an ephemeral subscription at the topic head
//! (the transport cannot replay history), and a resume-from-sequence
//! start reuses its value as a named subscription: checkpoints in the
//! pub/sub sequence space store the subscription name.  Pulled messages
//! are acknowledged on successful receipt.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::{
    CursorStart, PackedRecord, PutAck, PutOutcome, RawRecord, RecordPage, ShardListing,
    StreamBackend,
};
use crate::errors::BackendError;

/// Per-publish cap on message count.
pub const BATCH_MAX_MSGS: usize = 1000;

/// Per-publish cap on summed body bytes.
pub const BATCH_MAX_BYTES: usize = 10_000_000;

/// How many messages one `get_records` pull asks for.
pub const PULL_BATCH_SIZE: usize = 100;

/// One message pulled from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Bytes,
}

/// The out-of-scope SDK surface of a pub/sub provider.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Publish bodies to a topic; returns one message id per body.
    async fn publish(&self, topic: &str, bodies: &[Bytes]) -> Result<Vec<String>, BackendError>;

    /// Create (or attach to) a subscription.  `None` requests an
    /// ephemeral subscription at the topic head; `Some(name)` reuses a
    /// named subscription, creating it at the head if absent.
    async fn create_subscription(
        &self,
        topic: &str,
        name: Option<&str>,
    ) -> Result<String, BackendError>;

    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
    ) -> Result<Vec<PulledMessage>, BackendError>;

    async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), BackendError>;
}

/// Adapts a [`PubSubTransport`] to the [`StreamBackend`] surface.
pub struct PubSubBackend {
    transport: Arc<dyn PubSubTransport>,
    topic: String,
}

impl PubSubBackend {
    pub fn new(transport: Arc<dyn PubSubTransport>, topic: impl Into<String>) -> Self {
        PubSubBackend {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Split bodies into publish calls honoring both the message-count
    /// and byte caps.  An oversized single body still goes out alone.
    fn chunk_bodies(bodies: &[Bytes]) -> Vec<&[Bytes]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut bytes = 0;
        for (i, body) in bodies.iter().enumerate() {
            let over_count = i - start >= BATCH_MAX_MSGS;
            let over_bytes = i > start && bytes + body.len() > BATCH_MAX_BYTES;
            if over_count || over_bytes {
                chunks.push(&bodies[start..i]);
                start = i;
                bytes = 0;
            }
            bytes += body.len();
        }
        if start < bodies.len() {
            chunks.push(&bodies[start..]);
        }
        chunks
    }
}

#[async_trait]
impl StreamBackend for PubSubBackend {
    async fn put_record(
        &self,
        _stream: &str,
        record: PackedRecord,
    ) -> Result<PutAck, BackendError> {
        let ids = self
            .transport
            .publish(&self.topic, std::slice::from_ref(&record.data))
            .await?;
        let seq_num = ids.into_iter().next().unwrap_or_default();
        Ok(PutAck {
            shard_id: self.topic.clone(),
            seq_num,
        })
    }

    async fn put_records(
        &self,
        _stream: &str,
        records: &[PackedRecord],
    ) -> Result<Vec<PutOutcome>, BackendError> {
        let bodies: Vec<Bytes> = records.iter().map(|r| r.data.clone()).collect();
        let mut outcomes = Vec::with_capacity(records.len());
        for chunk in Self::chunk_bodies(&bodies) {
            let ids = self.transport.publish(&self.topic, chunk).await?;
            outcomes.extend(ids.into_iter().map(|id| {
                PutOutcome::Ok(PutAck {
                    shard_id: self.topic.clone(),
                    seq_num: id,
                })
            }));
        }
        Ok(outcomes)
    }

    async fn describe_shards(&self, _stream: &str) -> Result<ShardListing, BackendError> {
        Ok(ShardListing {
            shard_ids: vec![self.topic.clone()],
            has_more: false,
        })
    }

    async fn get_cursor(
        &self,
        _stream: &str,
        _shard_id: &str,
        start: CursorStart<'_>,
    ) -> Result<String, BackendError> {
        match start {
            CursorStart::Latest | CursorStart::TrimHorizon => {
                self.transport.create_subscription(&self.topic, None).await
            }
            CursorStart::AfterSequenceNumber(name) => {
                self.transport
                    .create_subscription(&self.topic, Some(name))
                    .await
            }
        }
    }

    async fn get_records(&self, cursor: &str) -> Result<RecordPage, BackendError> {
        let messages = self.transport.pull(cursor, PULL_BATCH_SIZE).await?;
        let ack_ids: Vec<String> = messages.iter().map(|m| m.ack_id.clone()).collect();
        if !ack_ids.is_empty() {
            self.transport.acknowledge(cursor, &ack_ids).await?;
        }
        Ok(RecordPage {
            records: messages
                .into_iter()
                .map(|m| RawRecord {
                    seq_num: m.message_id,
                    data: m.data,
                })
                .collect(),
            // The subscription is the cursor; it never advances and the
            // shard never ends.
            next_cursor: Some(cursor.to_owned()),
            millis_behind_latest: 0,
        })
    }

    fn batch_max_records(&self) -> usize {
        BATCH_MAX_MSGS
    }
}
