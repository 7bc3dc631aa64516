/// End-to-end tests: the non-blocking client pushes framed records over
/// a real PUSH/PULL socket pair into the receiver, which re-batches and
/// flushes to the debug sink.
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use triton::nonblocking::ZmqRelay;
use triton::record::{FieldValue, RecordData, record_data};
use tritond::batcher::Batcher;
use tritond::receiver::Receiver;
use tritond::sink::DebugSink;

// ---------------------------------------------------------------------------
// Debug-file decoding
// ---------------------------------------------------------------------------

/// Decode the debug sink format: a msgpack string switches the current
/// stream, maps are its records.
fn decode_debug_file(path: &std::path::Path) -> HashMap<String, Vec<RecordData>> {
    let bytes = std::fs::read(path).unwrap_or_default();
    let mut cursor = std::io::Cursor::new(bytes);
    let mut out: HashMap<String, Vec<RecordData>> = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match rmp_serde::from_read::<_, FieldValue>(&mut cursor) {
            Ok(FieldValue::Str(stream)) => current = Some(stream),
            Ok(FieldValue::Map(record)) => {
                let stream = current.clone().expect("stream name before records");
                out.entry(stream).or_default().push(record);
            }
            Ok(other) => panic!("unexpected debug value: {other:?}"),
            Err(rmp_serde::decode::Error::InvalidMarkerRead(e))
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => panic!("debug file decode failed: {e}"),
        }
    }
    out
}

struct Daemon {
    endpoint: String,
    shutdown: oneshot::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
    sink_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn start_daemon() -> Daemon {
    let dir = tempfile::tempdir().unwrap();
    let sink_path = dir.path().join("debug.out");
    let sink = Arc::new(DebugSink::create(&sink_path).unwrap());
    let batcher = Batcher::new(sink, 500);

    let receiver = Receiver::bind("tcp://127.0.0.1:0").await.unwrap();
    let endpoint = receiver.endpoint().to_owned();

    let (shutdown, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        receiver
            .run(batcher, Duration::from_millis(50), shutdown_rx)
            .await;
    });

    Daemon {
        endpoint,
        shutdown,
        handle,
        sink_path,
        _dir: dir,
    }
}

async fn settle<F: Fn(&HashMap<String, Vec<RecordData>>) -> bool>(
    path: &std::path::Path,
    deadline: Duration,
    done: F,
) -> HashMap<String, Vec<RecordData>> {
    let start = std::time::Instant::now();
    loop {
        let decoded = decode_debug_file(path);
        if done(&decoded) || start.elapsed() > deadline {
            return decoded;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn test_record() -> RecordData {
    record_data([("pkey", "my_key".into()), ("value", true.into())])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Test: ten records arrive in the sink under their stream name.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forwards_records_end_to_end() {
    let daemon = start_daemon().await;

    let relay = ZmqRelay::connect(&daemon.endpoint);
    let stream = relay.stream("test_stream", "pkey").unwrap();
    for _ in 0..10 {
        stream.put(&test_record());
    }

    let received = settle(&daemon.sink_path, Duration::from_secs(5), |d| {
        d.get("test_stream").map_or(0, Vec::len) == 10
    })
    .await;

    let records = &received["test_stream"];
    assert_eq!(records.len(), 10);
    assert_eq!(records[0]["value"], FieldValue::Bool(true));
    assert_eq!(records[0]["pkey"], FieldValue::Str("my_key".into()));

    relay.shutdown().await;
    let _ = daemon.shutdown.send(());
    let _ = daemon.handle.await;
}

/// Test: records for different streams land in separate batches under
/// their own names.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multiple_streams_are_kept_apart() {
    let daemon = start_daemon().await;

    let relay = ZmqRelay::connect(&daemon.endpoint);
    for name in ["stream_a", "stream_b"] {
        let stream = relay.stream(name, "pkey").unwrap();
        stream.put(&test_record());
    }

    let received = settle(&daemon.sink_path, Duration::from_secs(5), |d| {
        d.len() == 2 && d.values().all(|v| v.len() == 1)
    })
    .await;

    let mut names: Vec<&str> = received.keys().map(String::as_str).collect();
    names.sort_unstable();
    assert_eq!(names, ["stream_a", "stream_b"]);
    for records in received.values() {
        assert_eq!(records.len(), 1);
    }

    relay.shutdown().await;
    let _ = daemon.shutdown.send(());
    let _ = daemon.handle.await;
}

/// Test: 20,000 records published fire-and-forget all reach the sink
/// within a short settling window.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forwards_volume() {
    let daemon = start_daemon().await;

    let relay = ZmqRelay::connect(&daemon.endpoint);
    let stream = relay.stream("test_stream2", "pkey").unwrap();

    const SEND_COUNT: usize = 20_000;
    // Pace bursts against sink progress: a producer that outruns the
    // bounded client queue sees drops, which is the fire-and-forget
    // contract, not what this test measures.
    const BURST: usize = 1500;
    let mut sent = 0;
    while sent < SEND_COUNT {
        let n = BURST.min(SEND_COUNT - sent);
        for _ in 0..n {
            stream.put(&test_record());
        }
        sent += n;
        let floor = sent.saturating_sub(BURST);
        settle(&daemon.sink_path, Duration::from_secs(30), |d| {
            d.get("test_stream2").map_or(0, Vec::len) >= floor
        })
        .await;
    }

    let received = settle(&daemon.sink_path, Duration::from_secs(30), |d| {
        d.get("test_stream2").map_or(0, Vec::len) == SEND_COUNT
    })
    .await;
    assert_eq!(received.get("test_stream2").map_or(0, Vec::len), SEND_COUNT);

    relay.shutdown().await;
    let _ = daemon.shutdown.send(());
    let _ = daemon.handle.await;
}

/// Test: malformed frames are dropped without disturbing well-formed
/// traffic.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn malformed_frames_are_dropped() {
    use zeromq::{Socket, SocketSend};

    let daemon = start_daemon().await;

    // A bare single-part message straight at the socket.
    let mut rogue = zeromq::PushSocket::new();
    rogue.connect(&daemon.endpoint).await.unwrap();
    rogue
        .send(zeromq::ZmqMessage::from("not a triton frame"))
        .await
        .unwrap();

    let relay = ZmqRelay::connect(&daemon.endpoint);
    let stream = relay.stream("test_stream", "pkey").unwrap();
    stream.put(&test_record());

    let received = settle(&daemon.sink_path, Duration::from_secs(5), |d| {
        d.get("test_stream").map_or(0, Vec::len) == 1
    })
    .await;
    assert_eq!(received.len(), 1);
    assert_eq!(received["test_stream"].len(), 1);

    relay.shutdown().await;
    let _ = daemon.shutdown.send(());
    let _ = daemon.handle.await;
}
