//! Durable per-client checkpoints in a relational store.
//!
//! A checkpoint row records the last sequence number a named client has
//! fully processed on one shard of one stream.  The client name is a
//! per-process identity that partitions the checkpoint namespace: two
//! processes sharing a client name on the same stream will trample each
//! other's cursors.  The core does not coordinate consumers.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::errors::TritonError;

/// The seam the shard iterators checkpoint through.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert on first checkpoint for the shard, update thereafter.
    async fn checkpoint(&self, shard_id: &str, seq_num: &str) -> Result<(), TritonError>;

    /// The most recently checkpointed sequence number, if any.
    async fn last_sequence_number(&self, shard_id: &str) -> Result<Option<String>, TritonError>;
}

pub const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS triton_checkpoint (
    client  TEXT NOT NULL,
    stream  TEXT NOT NULL,
    shard   TEXT NOT NULL,
    seq_num TEXT NOT NULL,
    updated BIGINT NOT NULL,
    PRIMARY KEY (client, stream, shard)
)";

const CHECKPOINT_EXISTS_SQL: &str =
    "SELECT 1 FROM triton_checkpoint WHERE client = $1 AND stream = $2 AND shard = $3";

const UPDATE_CHECKPOINT_SQL: &str = "UPDATE triton_checkpoint SET seq_num = $1, updated = $2 \
     WHERE client = $3 AND stream = $4 AND shard = $5";

const CREATE_CHECKPOINT_SQL: &str =
    "INSERT INTO triton_checkpoint (client, stream, shard, seq_num, updated) \
     VALUES ($1, $2, $3, $4, $5)";

const LAST_SEQ_NUM_SQL: &str =
    "SELECT seq_num FROM triton_checkpoint WHERE client = $1 AND stream = $2 AND shard = $3";

/// Checkpoint store over a Postgres connection pool.
///
/// Each operation acquires one connection, runs one transaction, and
/// returns the connection to the pool.  Errors roll the transaction
/// back and re-raise.
pub struct PgCheckpointer {
    pool: PgPool,
    client_name: String,
    stream_name: String,
}

impl PgCheckpointer {
    /// Wrap an existing pool.  Fails with `CheckpointConfig` when the
    /// client name is empty.
    pub fn new(
        pool: PgPool,
        client_name: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Result<Self, TritonError> {
        let client_name = client_name.into();
        if client_name.is_empty() {
            return Err(TritonError::CheckpointConfig(
                "client name is required".to_owned(),
            ));
        }
        Ok(PgCheckpointer {
            pool,
            client_name,
            stream_name: stream_name.into(),
        })
    }

    /// Build a lazily-connecting pool from a DSN.  Fails with
    /// `CheckpointConfig` when the DSN is empty or malformed.
    pub fn connect(
        dsn: &str,
        client_name: impl Into<String>,
        stream_name: impl Into<String>,
    ) -> Result<Self, TritonError> {
        if dsn.is_empty() {
            return Err(TritonError::CheckpointConfig(
                "database DSN is required".to_owned(),
            ));
        }
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect_lazy(dsn)
            .map_err(|e| TritonError::CheckpointConfig(format!("bad DSN: {e}")))?;
        Self::new(pool, client_name, stream_name)
    }

    /// Build from `TRITON_DB` and `TRITON_CLIENT_NAME`.
    pub fn from_env(stream_name: impl Into<String>) -> Result<Self, TritonError> {
        let dsn = crate::config::db_dsn().ok_or_else(|| {
            TritonError::CheckpointConfig(format!("{} is not set", crate::config::ENV_TRITON_DB))
        })?;
        let client = crate::config::client_name().ok_or_else(|| {
            TritonError::CheckpointConfig(format!(
                "{} is not set",
                crate::config::ENV_TRITON_CLIENT_NAME
            ))
        })?;
        Self::connect(&dsn, client, stream_name)
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Create the checkpoint table if it does not exist.
    pub async fn init_db(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::query(CREATE_TABLE_SQL).execute(pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointer {
    async fn checkpoint(&self, shard_id: &str, seq_num: &str) -> Result<(), TritonError> {
        let mut tx = self.pool.begin().await?;
        let exists = sqlx::query(CHECKPOINT_EXISTS_SQL)
            .bind(&self.client_name)
            .bind(&self.stream_name)
            .bind(shard_id)
            .fetch_optional(&mut *tx)
            .await?;

        let updated = Utc::now().timestamp();
        if exists.is_some() {
            info!(
                stream = %self.stream_name,
                shard = shard_id,
                seq_num,
                "updating checkpoint"
            );
            sqlx::query(UPDATE_CHECKPOINT_SQL)
                .bind(seq_num)
                .bind(updated)
                .bind(&self.client_name)
                .bind(&self.stream_name)
                .bind(shard_id)
                .execute(&mut *tx)
                .await?;
        } else {
            info!(
                stream = %self.stream_name,
                shard = shard_id,
                seq_num,
                "creating checkpoint"
            );
            sqlx::query(CREATE_CHECKPOINT_SQL)
                .bind(&self.client_name)
                .bind(&self.stream_name)
                .bind(shard_id)
                .bind(seq_num)
                .bind(updated)
                .execute(&mut *tx)
                .await?;
        }
        // Dropping the transaction without this rolls back.
        tx.commit().await?;
        Ok(())
    }

    async fn last_sequence_number(&self, shard_id: &str) -> Result<Option<String>, TritonError> {
        let seq: Option<(String,)> = sqlx::query_as(LAST_SEQ_NUM_SQL)
            .bind(&self.client_name)
            .bind(&self.stream_name)
            .bind(shard_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(seq.map(|(s,)| s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: an empty DSN fails construction.
    #[test]
    fn empty_dsn_is_config_error() {
        let err = PgCheckpointer::connect("", "client", "stream")
            .err()
            .expect("empty DSN must fail");
        assert!(matches!(err, TritonError::CheckpointConfig(_)));
    }

    /// Test: an empty client name fails construction.
    #[tokio::test]
    async fn empty_client_name_is_config_error() {
        let err = PgCheckpointer::connect("postgres://localhost/triton", "", "stream")
            .err()
            .expect("empty client name must fail");
        assert!(matches!(err, TritonError::CheckpointConfig(_)));
    }

    /// Test: the four prepared statements address the composite primary
    /// key and nothing else.
    #[test]
    fn statement_shapes() {
        for sql in [CHECKPOINT_EXISTS_SQL, LAST_SEQ_NUM_SQL] {
            assert!(sql.contains("client = $1"));
            assert!(sql.contains("stream = $2"));
            assert!(sql.contains("shard = $3"));
        }
        assert!(UPDATE_CHECKPOINT_SQL.contains("SET seq_num = $1, updated = $2"));
        assert!(CREATE_CHECKPOINT_SQL.contains("VALUES ($1, $2, $3, $4, $5)"));
        assert!(CREATE_TABLE_SQL.contains("PRIMARY KEY (client, stream, shard)"));
    }
}
