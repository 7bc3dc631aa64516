//! The local PULL socket receiver.
//!
//! Clients send two-part messages: a fixed-width meta header and the
//! encoded record body.  Malformed frames (wrong part count, bad
//! version byte, unparseable header) are logged and dropped; one bad
//! client must not take the daemon down.
//!
//! The socket is drained by a dedicated reader task feeding a channel,
//! so the flush tick never races a half-received message.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use triton::backend::PackedRecord;
use triton_wire::parse_meta;
use zeromq::{Socket, SocketRecv, ZmqMessage};

use crate::batcher::Batcher;

/// Frames buffered between the socket reader and the batcher.
const READER_CHANNEL_CAPACITY: usize = 1024;

pub struct Receiver {
    socket: zeromq::PullSocket,
    endpoint: String,
}

impl Receiver {
    /// Bind the PULL socket.  Use port `0` to let the OS choose; the
    /// resolved endpoint is available from [`Receiver::endpoint`].
    pub async fn bind(endpoint: &str) -> Result<Self, zeromq::ZmqError> {
        let mut socket = zeromq::PullSocket::new();
        let resolved = socket.bind(endpoint).await?;
        Ok(Receiver {
            socket,
            endpoint: resolved.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Receive until shutdown, pushing records into the batcher and
    /// flushing on the periodic tick.  Remaining batches flush once
    /// more on the way out.
    pub async fn run(
        self,
        mut batcher: Batcher,
        flush_interval: Duration,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let Receiver {
            mut socket,
            endpoint,
        } = self;
        info!(endpoint = %endpoint, "receiver listening");

        let (frames_tx, mut frames_rx) = mpsc::channel::<ZmqMessage>(READER_CHANNEL_CAPACITY);
        let reader = tokio::spawn(async move {
            loop {
                match socket.recv().await {
                    Ok(message) => {
                        if frames_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "socket receive failed; reader stopping");
                        break;
                    }
                }
            }
        });

        let mut tick = tokio::time::interval(flush_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = frames_rx.recv() => match maybe {
                    Some(message) => handle_message(message, &mut batcher).await,
                    None => break,
                },
                _ = tick.tick() => batcher.flush_all().await,
                _ = &mut shutdown => {
                    info!("receiver shutting down");
                    break;
                }
            }
        }

        reader.abort();
        batcher.flush_all().await;
    }
}

async fn handle_message(message: ZmqMessage, batcher: &mut Batcher) {
    if message.len() != 2 {
        warn!(parts = message.len(), "expected two-part message; dropping");
        return;
    }
    let (Some(meta), Some(body)) = (message.get(0), message.get(1)) else {
        warn!("two-part message with missing frames; dropping");
        return;
    };
    let meta = match parse_meta(meta) {
        Ok(meta) => meta,
        Err(e) => {
            warn!(error = %e, "bad meta header; dropping frame");
            return;
        }
    };
    batcher
        .push(
            meta.stream_name,
            PackedRecord {
                data: body.clone(),
                partition_key: meta.partition_key,
            },
        )
        .await;
}
