/// Pub/sub adapter tests: publish caps, subscription-as-cursor reads,
/// and named-subscription resume.
use std::sync::Arc;

use triton::pubsub::{BATCH_MAX_MSGS, PubSubBackend, PubSubTransport};
use triton::record::{RecordData, record_data};
use triton::stream::Stream;
use triton_test_utils::MemoryPubSub;

fn pubsub_stream(transport: Arc<MemoryPubSub>) -> Stream {
    Stream::new(
        Arc::new(PubSubBackend::new(transport, "foobar")),
        "foobar",
        "value",
    )
}

fn batch(n: usize) -> Vec<RecordData> {
    (0..n)
        .map(|i| record_data([("blob", "foobar".into()), ("value", (i as i64).into())]))
        .collect()
}

/// Test: publishing one record acks with the topic as the shard.
#[tokio::test]
async fn publish_oneoff() {
    let transport = Arc::new(MemoryPubSub::new());
    let stream = pubsub_stream(transport.clone());

    let (shard_id, seq_num) = stream
        .put(&record_data([("blob", "foobar".into()), ("value", 10234i64.into())]))
        .await
        .unwrap();
    assert_eq!(shard_id, "foobar");
    assert_eq!(seq_num, "m-0");
    assert_eq!(transport.published("foobar").len(), 1);
}

/// Test: a batch of 101 records publishes completely, in order.
#[tokio::test]
async fn publish_batch() {
    let transport = Arc::new(MemoryPubSub::new());
    let stream = pubsub_stream(transport.clone());

    let acks = stream.put_many(&batch(101)).await.unwrap();
    assert_eq!(acks.len(), 101);
    assert_eq!(transport.published("foobar").len(), 101);
}

/// Test: batches past the per-publish caps are split and still fully
/// delivered.
#[tokio::test]
async fn publish_batch_larger_than_limits() {
    let transport = Arc::new(MemoryPubSub::new());
    let stream = pubsub_stream(transport.clone());

    let n = 2 * BATCH_MAX_MSGS + 10;
    let acks = stream.put_many(&batch(n)).await.unwrap();
    assert_eq!(acks.len(), n);
    assert_eq!(transport.published("foobar").len(), n);
}

/// Test: a named subscription created before publishing replays the
/// batch when used as the resume cursor, and records decode.
#[tokio::test(start_paused = true)]
async fn named_subscription_resume() {
    let transport = Arc::new(MemoryPubSub::new());
    transport
        .create_subscription("foobar", Some("custom-subscription-id-1"))
        .await
        .unwrap();

    let stream = pubsub_stream(transport.clone());
    stream.put_many(&batch(3)).await.unwrap();

    let mut iter = stream.build_iterator_from_seqnum("foobar", "custom-subscription-id-1");
    for i in 0..3i64 {
        let record = iter.next_record().await.unwrap().expect("replayed record");
        assert_eq!(record.shard_id, "foobar");
        assert_eq!(record.data["value"], triton::FieldValue::Int(i));
    }
}

/// Test: a latest iterator only sees records published after its first
/// fill acquired the ephemeral subscription.
#[tokio::test(start_paused = true)]
async fn latest_skips_history() {
    let transport = Arc::new(MemoryPubSub::new());
    let stream = pubsub_stream(transport.clone());
    stream.put_many(&batch(5)).await.unwrap();

    let mut iter = stream.build_iterator_from_latest(&[]).await.unwrap();
    // First cycle creates the subscription at the head: nothing there.
    assert!(iter.try_next_record().await.unwrap().is_none());

    stream.put(&record_data([("blob", "x".into()), ("value", 99i64.into())]))
        .await
        .unwrap();
    let record = iter.next_record().await.unwrap().expect("fresh record");
    assert_eq!(record.data["value"], triton::FieldValue::Int(99));
}
