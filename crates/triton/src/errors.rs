//! Error types shared across the client library.
//!
//! Propagation policy: transient backend failures (HTTP-500-class and the
//! explicit throughput-exceeded signal) are retried in place by the
//! producer; everything else surfaces to the caller.  Database errors
//! inside the checkpointer roll the transaction back and re-raise.
//! Non-blocking sends never raise; they log and drop.

use thiserror::Error;

use crate::backend::PackedRecord;
use crate::codec::CodecError;

/// Top-level error for producer, iterator, checkpoint, and config paths.
#[derive(Debug, Error)]
pub enum TritonError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("stream '{0}' is not configured")]
    StreamNotConfigured(String),

    #[error("shard index {0} out of range")]
    ShardNotFound(usize),

    /// The backend stopped issuing cursors for the shard (split/merge).
    #[error("end of shard")]
    EndOfShard,

    /// The backend reported more shard pages than the core supports.
    #[error("shard listing has more pages; pagination is not implemented")]
    UnimplementedPagination,

    #[error("record has no partition key field '{0}'")]
    MissingPartitionKey(String),

    #[error("partition key is {0} bytes; the frame allows 64")]
    PartitionKeyTooLong(usize),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Batch write gave up after the retry budget; the still-unsent
    /// packed records are attached so the caller can spill or re-drive
    /// them.
    #[error("batch write failed; {} records unsent after retries", .failed.len())]
    PutMany { failed: Vec<PackedRecord> },

    #[error("checkpoint configuration: {0}")]
    CheckpointConfig(String),

    #[error("checkpoint store: {0}")]
    Checkpoint(#[from] sqlx::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// How a backend failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Provisioned throughput exceeded; always transient.
    ThroughputExceeded,
    /// HTTP-500-class service failure; transient.
    ServiceFailure,
    /// Anything else; fatal, surfaces immediately.
    Other,
}

impl std::fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendErrorKind::ThroughputExceeded => write!(f, "throughput exceeded"),
            BackendErrorKind::ServiceFailure => write!(f, "service failure"),
            BackendErrorKind::Other => write!(f, "error"),
        }
    }
}

/// An ambiguous backend failure, classified for retry purposes.
#[derive(Debug, Clone, Error)]
#[error("backend {kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn throughput_exceeded(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::ThroughputExceeded,
            message: message.into(),
        }
    }

    pub fn service_failure(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::ServiceFailure,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        BackendError {
            kind: BackendErrorKind::Other,
            message: message.into(),
        }
    }

    /// Whether the retry policy may re-attempt the call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            BackendErrorKind::ThroughputExceeded | BackendErrorKind::ServiceFailure
        )
    }
}
