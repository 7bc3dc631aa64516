//! The non-blocking forwarder client.
//!
//! `put` never blocks and never raises: records are framed and handed to
//! a bounded in-process queue drained by a worker task that owns the
//! PUSH socket to tritond.  When the queue is full, the daemon is
//! unreachable, or the record cannot be serialized, the record is logged
//! and dropped: the fire-and-forget path trades durability for never
//! stalling the caller.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use triton_wire::{FIELD_WIDTH, pack_meta};
use zeromq::{Socket, SocketSend, ZmqMessage};

use crate::codec;
use crate::config::TritonConfig;
use crate::errors::TritonError;
use crate::record::RecordData;

/// Bound on queued two-part messages, so an unreachable tritond cannot
/// run the process out of memory.
pub const MAX_QUEUED_MESSAGES: usize = 3500;

/// How long shutdown waits for queued messages to drain.
pub const LINGER_SHUTDOWN_MSECS: u64 = 3000;

/// The process-wide relay to tritond: one bounded queue, one worker
/// task, one PUSH socket.
///
/// Owned explicitly by the embedding application; create once, clone
/// [`NonblockingStream`]s from it per stream, and call
/// [`ZmqRelay::shutdown`] at teardown.
pub struct ZmqRelay {
    tx: mpsc::Sender<ZmqMessage>,
    worker: JoinHandle<()>,
}

impl ZmqRelay {
    /// Start the relay worker targeting `endpoint`
    /// (`tcp://host:port`).  Connection is lazy; the daemon does not
    /// need to be up yet.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(MAX_QUEUED_MESSAGES);
        let worker = tokio::spawn(relay_worker(endpoint.into(), rx));
        ZmqRelay { tx, worker }
    }

    /// Start the relay from `TRITON_ZMQ_HOST` / `TRITON_ZMQ_PORT`.
    pub fn from_env() -> Self {
        Self::connect(crate::config::zmq_endpoint())
    }

    /// A non-blocking producer for one stream.
    ///
    /// The stream name must fit the 64-byte frame field; over-long names
    /// fail here so `put` never has to.
    pub fn stream(
        &self,
        name: &str,
        partition_key_field: &str,
    ) -> Result<NonblockingStream, TritonError> {
        if name.len() > FIELD_WIDTH {
            return Err(TritonError::InvalidConfiguration(format!(
                "stream name '{name}' is {} bytes; the frame allows {FIELD_WIDTH}",
                name.len()
            )));
        }
        Ok(NonblockingStream {
            name: name.to_owned(),
            partition_key_field: partition_key_field.to_owned(),
            tx: self.tx.clone(),
        })
    }

    /// Close the queue and linger up to [`LINGER_SHUTDOWN_MSECS`] for
    /// the worker to drain what was already accepted.
    pub async fn shutdown(self) {
        let ZmqRelay { tx, worker } = self;
        drop(tx);
        let abort = worker.abort_handle();
        match tokio::time::timeout(Duration::from_millis(LINGER_SHUTDOWN_MSECS), worker).await {
            Ok(_) => debug!("forwarder relay drained"),
            Err(_) => {
                warn!("forwarder relay did not drain within linger; aborting");
                abort.abort();
            }
        }
    }
}

/// Drains the queue into the PUSH socket, reconnecting between
/// failures.  Messages that arrive while the daemon is unreachable are
/// dropped with a warning.
async fn relay_worker(endpoint: String, mut rx: mpsc::Receiver<ZmqMessage>) {
    let mut socket: Option<zeromq::PushSocket> = None;
    while let Some(message) = rx.recv().await {
        if socket.is_none() {
            let mut fresh = zeromq::PushSocket::new();
            match fresh.connect(&endpoint).await {
                Ok(()) => {
                    debug!(%endpoint, "connected forwarder socket");
                    socket = Some(fresh);
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "tritond unreachable; dropping message");
                    continue;
                }
            }
        }
        let Some(live) = socket.as_mut() else {
            continue;
        };
        if let Err(e) = live.send(message).await {
            warn!(error = %e, "failed sending forwarder frame; dropping");
            socket = None;
        }
    }
}

/// A fire-and-forget producer for one stream.
#[derive(Clone)]
pub struct NonblockingStream {
    name: String,
    partition_key_field: String,
    tx: mpsc::Sender<ZmqMessage>,
}

impl NonblockingStream {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frame and enqueue one record.  Never blocks, never raises:
    /// missing or over-long partition keys, serialization failures, and
    /// a full queue all log and drop.
    pub fn put(&self, data: &RecordData) {
        let Some(value) = data.get(&self.partition_key_field) else {
            warn!(
                stream = %self.name,
                field = %self.partition_key_field,
                "record has no partition key; dropping"
            );
            return;
        };
        let key = value.to_string();
        if key.len() > FIELD_WIDTH {
            warn!(
                stream = %self.name,
                key_bytes = key.len(),
                "partition key too long for frame; dropping"
            );
            return;
        }

        let body = match codec::encode(data) {
            Ok(body) => body,
            Err(e) => {
                error!(stream = %self.name, error = %e, "serialization failure; dropping record");
                return;
            }
        };

        let meta = pack_meta(&self.name, &key);
        let mut message = ZmqMessage::from(Bytes::copy_from_slice(&meta));
        message.push_back(Bytes::from(body));

        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(stream = %self.name, "forwarder queue full; dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(stream = %self.name, "forwarder relay is shut down; dropping record");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_sender(
        name: &str,
        partition_key_field: &str,
        tx: mpsc::Sender<ZmqMessage>,
    ) -> Self {
        NonblockingStream {
            name: name.to_owned(),
            partition_key_field: partition_key_field.to_owned(),
            tx,
        }
    }
}

/// Look up `name` in the configuration and return a non-blocking
/// producer bound to its partition-key field.
pub fn get_nonblocking_stream(
    name: &str,
    config: &TritonConfig,
    relay: &ZmqRelay,
) -> Result<NonblockingStream, TritonError> {
    let stream_config = config
        .get(name)
        .ok_or_else(|| TritonError::StreamNotConfigured(name.to_owned()))?;
    let field = stream_config.partition_key_field().ok_or_else(|| {
        TritonError::InvalidConfiguration(format!(
            "stream '{name}' has no partition_key configured"
        ))
    })?;
    relay.stream(name, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_data;
    use triton_wire::parse_meta;

    /// Test: put sends the meta header and the encoded body as the two
    /// message parts.
    #[tokio::test]
    async fn put_frames_meta_and_body() {
        let (tx, mut rx) = mpsc::channel(4);
        let stream = NonblockingStream::with_sender("test_stream", "pkey", tx);

        let data = record_data([("pkey", "my_key".into()), ("value", true.into())]);
        stream.put(&data);

        let message = rx.recv().await.expect("one queued message");
        assert_eq!(message.len(), 2);
        let meta = parse_meta(message.get(0).unwrap()).unwrap();
        assert_eq!(meta.stream_name, "test_stream");
        assert_eq!(meta.partition_key, "my_key");
        let body = codec::decode(message.get(1).unwrap()).unwrap();
        assert_eq!(body, data);
    }

    /// Test: a full queue drops instead of blocking.
    #[tokio::test]
    async fn full_queue_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        let stream = NonblockingStream::with_sender("test_stream", "pkey", tx);
        let data = record_data([("pkey", "k".into())]);

        stream.put(&data);
        stream.put(&data);

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    /// Test: a record without the partition-key field drops silently.
    #[tokio::test]
    async fn missing_partition_key_drops() {
        let (tx, mut rx) = mpsc::channel(4);
        let stream = NonblockingStream::with_sender("test_stream", "pkey", tx);

        stream.put(&record_data([("other", 1i64.into())]));
        assert!(rx.try_recv().is_err());
    }

    /// Test: over-long stream names are rejected at construction.
    #[tokio::test]
    async fn long_stream_name_rejected() {
        let relay = ZmqRelay::connect("tcp://127.0.0.1:1");
        let long = "s".repeat(65);
        assert!(matches!(
            relay.stream(&long, "pkey"),
            Err(TritonError::InvalidConfiguration(_))
        ));
        relay.shutdown().await;
    }
}
