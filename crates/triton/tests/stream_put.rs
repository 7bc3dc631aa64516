/// Producer tests: single and batched writes against a scripted
/// backend, partition-key derivation, chunking, and retry accounting.
use std::sync::Arc;

use triton::backend::{PayloadArmor, PutAck, PutOutcome};
use triton::errors::{BackendError, TritonError};
use triton::record::{RecordData, record_data};
use triton::stream::Stream;
use triton_test_utils::MockBackend;

fn records(n: usize) -> Vec<RecordData> {
    (0..n)
        .map(|i| record_data([("value", (i as i64).into())]))
        .collect()
}

fn all_ok(entries: usize) -> Vec<PutOutcome> {
    (0..entries)
        .map(|i| {
            PutOutcome::Ok(PutAck {
                shard_id: "0001".to_owned(),
                seq_num: i.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// put
// ---------------------------------------------------------------------------

/// Test: the put-one happy path returns the backend's (shard, seq).
#[tokio::test]
async fn put_one_happy_path() {
    let backend = Arc::new(MockBackend::new());
    let stream = Stream::new(backend, "test_stream", "value");

    let (shard_id, seq_num) = stream.put(&record_data([("value", 0i64.into())])).await.unwrap();
    assert_eq!(shard_id, "0001");
    assert_eq!(seq_num, "1");
}

/// Test: after transient failures a successful put returns its
/// acknowledgement exactly once.
#[tokio::test(start_paused = true)]
async fn put_retries_transient_failures() {
    let backend = Arc::new(MockBackend::new().on_put_record(|call, _| {
        if call < 2 {
            Err(BackendError::service_failure("internal error"))
        } else {
            Ok(PutAck {
                shard_id: "0001".to_owned(),
                seq_num: "7".to_owned(),
            })
        }
    }));
    let stream = Stream::new(backend.clone(), "test_stream", "value");

    let ack = stream.put(&record_data([("value", 0i64.into())])).await.unwrap();
    assert_eq!(ack, ("0001".to_owned(), "7".to_owned()));
    assert_eq!(backend.put_record_calls(), 3);
}

/// Test: a record without the configured field fails with the textual
/// field name.
#[tokio::test]
async fn put_missing_partition_key() {
    let backend = Arc::new(MockBackend::new());
    let stream = Stream::new(backend, "test_stream", "value");

    let err = stream
        .put(&record_data([("other", 1i64.into())]))
        .await
        .unwrap_err();
    match err {
        TritonError::MissingPartitionKey(field) => assert_eq!(field, "value"),
        other => panic!("expected MissingPartitionKey, got {other:?}"),
    }
}

/// Test: partition keys past 64 bytes are rejected before the backend
/// sees them.
#[tokio::test]
async fn put_partition_key_too_long() {
    let backend = Arc::new(MockBackend::new());
    let stream = Stream::new(backend.clone(), "test_stream", "value");

    let long = "x".repeat(65);
    let err = stream
        .put(&record_data([("value", long.into())]))
        .await
        .unwrap_err();
    assert!(matches!(err, TritonError::PartitionKeyTooLong(65)));
    assert_eq!(backend.put_record_calls(), 0);
}

/// Test: the body is base64-armored when the backend requires it.
#[tokio::test]
async fn put_armors_body_when_required() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_by_backend = seen.clone();
    let backend = Arc::new(
        MockBackend::new()
            .with_armor(PayloadArmor::Base64)
            .on_put_record(move |_, record| {
                seen_by_backend.lock().unwrap().push(record.data.to_vec());
                Ok(PutAck {
                    shard_id: "0001".to_owned(),
                    seq_num: "1".to_owned(),
                })
            }),
    );
    let stream = Stream::new(backend, "test_stream", "value");

    let data = record_data([("value", 3i64.into())]);
    stream.put(&data).await.unwrap();

    let sent = seen.lock().unwrap();
    let unarmored = triton::codec::unarmor(&sent[0]).unwrap();
    assert_eq!(triton::codec::decode(&unarmored).unwrap(), data);
}

// ---------------------------------------------------------------------------
// put_many
// ---------------------------------------------------------------------------

/// Test: put_many of n records returns n acknowledgements and issues
/// ceil(n / 500) backend calls.
#[tokio::test]
async fn put_many_chunking() {
    for (n, expected_calls) in [(1, 1), (499, 1), (500, 1), (501, 2), (1201, 3)] {
        let backend = Arc::new(
            MockBackend::new().on_put_records(|_, entries| Ok(all_ok(entries.len()))),
        );
        let stream = Stream::new(backend.clone(), "test_stream", "value");

        let acks = stream.put_many(&records(n)).await.unwrap();
        assert_eq!(acks.len(), n, "acks for n={n}");
        assert_eq!(
            backend.put_records_calls(),
            expected_calls,
            "backend calls for n={n}"
        );
    }
}

/// Test: entries rejected inside otherwise-successful calls are
/// re-submitted until the batch fully succeeds on the fourth call.
#[tokio::test(start_paused = true)]
async fn put_many_partial_retry_recovers() {
    let backend = Arc::new(MockBackend::new().on_put_records(|call, entries| {
        Ok(entries
            .iter()
            .enumerate()
            .map(|(i, _)| {
                if call < 3 && i % 2 == 1 {
                    PutOutcome::Err {
                        code: "ProvisionedThroughputExceededException".to_owned(),
                        message: "slow down".to_owned(),
                    }
                } else {
                    PutOutcome::Ok(PutAck {
                        shard_id: "0001".to_owned(),
                        seq_num: i.to_string(),
                    })
                }
            })
            .collect())
    }));
    let stream = Stream::new(backend.clone(), "test_stream", "value");

    let acks = stream.put_many(&records(100)).await.unwrap();
    assert_eq!(acks.len(), 100);
    assert_eq!(backend.put_records_calls(), 4);
}

/// Test: persistent rejections exhaust the retry budget; the unsent
/// records come back attached to the error.
#[tokio::test(start_paused = true)]
async fn put_many_exhaustion_attaches_failed_records() {
    // Records with odd partition keys are rejected on every call.
    let backend = Arc::new(MockBackend::new().on_put_records(|_, entries| {
        Ok(entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let odd = entry
                    .partition_key
                    .parse::<u64>()
                    .map(|k| k % 2 == 1)
                    .unwrap_or(false);
                if odd {
                    PutOutcome::Err {
                        code: "InternalFailure".to_owned(),
                        message: "rejected".to_owned(),
                    }
                } else {
                    PutOutcome::Ok(PutAck {
                        shard_id: "0001".to_owned(),
                        seq_num: i.to_string(),
                    })
                }
            })
            .collect())
    }));
    let stream = Stream::new(backend.clone(), "test_stream", "value");

    let err = stream.put_many(&records(100)).await.unwrap_err();
    match err {
        TritonError::PutMany { failed } => {
            assert_eq!(failed.len(), 50);
            assert!(failed.len() < 100);
        }
        other => panic!("expected PutMany, got {other:?}"),
    }
    assert_eq!(backend.put_records_calls(), 4);
}

/// Test: a batch-level transient failure retries the whole call.
#[tokio::test(start_paused = true)]
async fn put_many_retries_whole_call_on_transient_error() {
    let backend = Arc::new(MockBackend::new().on_put_records(|call, entries| {
        if call == 0 {
            Err(BackendError::throughput_exceeded("throttled"))
        } else {
            Ok(all_ok(entries.len()))
        }
    }));
    let stream = Stream::new(backend.clone(), "test_stream", "value");

    let acks = stream.put_many(&records(10)).await.unwrap();
    assert_eq!(acks.len(), 10);
    assert_eq!(backend.put_records_calls(), 2);
}

// ---------------------------------------------------------------------------
// Shard discovery
// ---------------------------------------------------------------------------

/// Test: the shard listing is cached after the first fetch.
#[tokio::test]
async fn shards_are_cached() {
    let backend = Arc::new(MockBackend::new().with_shards(&["0001", "0002"]));
    let stream = Stream::new(backend, "test_stream", "value");

    assert_eq!(stream.shards().await.unwrap(), ["0001", "0002"]);
    assert_eq!(stream.shards().await.unwrap(), ["0001", "0002"]);
}

/// Test: a paginated shard listing is refused rather than truncated.
#[tokio::test]
async fn paginated_shard_listing_is_refused() {
    let backend = Arc::new(MockBackend::new().with_more_shards());
    let stream = Stream::new(backend, "test_stream", "value");

    assert!(matches!(
        stream.shards().await,
        Err(TritonError::UnimplementedPagination)
    ));
}

/// Test: select_shards projects indices, treats empty as "all", and
/// rejects out-of-range indices.
#[tokio::test]
async fn select_shards_projection() {
    let backend = Arc::new(MockBackend::new().with_shards(&["0001", "0002", "0003"]));
    let stream = Stream::new(backend, "test_stream", "value");

    assert_eq!(
        stream.select_shards(&[0, 2]).await.unwrap(),
        ["0001", "0003"]
    );
    assert_eq!(
        stream.select_shards(&[]).await.unwrap(),
        ["0001", "0002", "0003"]
    );
    assert!(matches!(
        stream.select_shards(&[4]).await,
        Err(TritonError::ShardNotFound(4))
    ));
}
