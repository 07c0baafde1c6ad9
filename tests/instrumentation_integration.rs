//! Integration tests for the instrumented connection
//!
//! Drives real in-process channels end to end and checks what reaches the
//! metrics sink.

use bytes::Bytes;
use rpc_meter::adapters::outbound::{DashMapMetricsSink, InProcessDialer, InProcessServer};
use rpc_meter::{
    CallKind, CallOptions, Code, ConnectivityState, DialOptions, InstrumentedConnection,
    MetricsSink, RpcChannel, RpcStatus, SinkError, StreamDescriptor,
};
use std::sync::Arc;
use std::time::Duration;

const TARGET: &str = "localhost:10000";

fn server() -> InProcessServer {
    InProcessServer::new()
        .unary("Get", |req| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(req)
        })
        .unary("Fail", |_req| async move {
            Err(RpcStatus::new(Code::NotFound, "missing"))
        })
        .unary("Slow", |_req| async move {
            tokio::time::sleep(Duration::from_millis(1100)).await;
            Ok(Bytes::from_static(b"late"))
        })
        .unary("Hang", |_req| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Bytes::new())
        })
        .stream("List", |stream| async move {
            for i in 0..3u8 {
                stream.send(Bytes::from(vec![i])).await?;
            }
            Ok(())
        })
        .stream("Chat", |mut stream| async move {
            while let Some(msg) = stream.recv().await {
                stream.send(msg).await?;
            }
            Ok(())
        })
}

async fn dial(sink: Arc<DashMapMetricsSink>) -> InstrumentedConnection {
    let dialer = InProcessDialer::new();
    dialer.register(TARGET, server());
    InstrumentedConnection::dial(&dialer, TARGET, &DialOptions::default(), sink)
        .await
        .unwrap()
}

/// Unary success: one ok increment, one latency sample near the call time
#[tokio::test]
async fn test_unary_success_scenario() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let resp = conn
        .invoke("Get", Bytes::from_static(b"req"), &CallOptions::default())
        .await;

    assert_eq!(resp, Ok(Bytes::from_static(b"req")));
    assert_eq!(sink.counter("Get.grpc_ok"), Some(1));
    assert_eq!(sink.counter("Get.grpc_fail"), Some(0));

    let latency = sink.samples("Get.latency").unwrap();
    assert_eq!(latency.len(), 1);
    assert!(latency[0] >= 5_000, "latency {} below 5ms", latency[0]);
    assert!(latency[0] < 500_000, "latency {} far above 5ms", latency[0]);
}

/// Unary failure: fail counter only, error returned as-is
#[tokio::test]
async fn test_unary_failure_scenario() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let resp = conn
        .invoke("Fail", Bytes::from_static(b"req"), &CallOptions::default())
        .await;

    assert_eq!(resp, Err(RpcStatus::new(Code::NotFound, "missing")));
    assert_eq!(sink.counter("Fail.grpc_fail"), Some(1));
    assert_eq!(sink.counter("Fail.grpc_ok"), Some(0));
}

/// Slow calls still measure close to wall-clock time
#[tokio::test]
async fn test_slow_call_latency() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    conn.invoke("Slow", Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    let latency = sink.samples("Slow.latency").unwrap()[0];
    assert!(latency >= 1_100_000, "latency {}", latency);
    assert!(latency < 3_000_000, "latency {}", latency);
}

/// A transport deadline is a call error and counts as a failure
#[tokio::test]
async fn test_deadline_counts_as_failure() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let opts = CallOptions::default().with_timeout(Duration::from_millis(20));
    let err = conn.invoke("Hang", Bytes::new(), &opts).await.unwrap_err();

    assert_eq!(err.code, Code::DeadlineExceeded);
    assert_eq!(sink.counter("Hang.grpc_fail"), Some(1));
    assert_eq!(sink.samples("Hang.latency").unwrap().len(), 1);
}

/// Many concurrent first callers produce a single registration
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_callers_register_once() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = Arc::new(dial(sink.clone()).await);

    let calls = (0..64).map(|i| {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.invoke("Get", Bytes::from(vec![i as u8]), &CallOptions::default())
                .await
        })
    });
    let results = futures::future::join_all(calls).await;

    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r.unwrap(), Ok(Bytes::from(vec![i as u8])));
    }
    assert_eq!(sink.setup_calls(), 1);
    assert_eq!(sink.counter("Get.grpc_ok"), Some(64));
    assert_eq!(sink.samples("Get.latency").unwrap().len(), 64);
}

/// Calls to one method leave other methods' series untouched
#[tokio::test]
async fn test_method_isolation() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    conn.invoke("Get", Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    assert!(!sink.is_registered("Fail.grpc_ok"));
    assert!(!sink.is_registered("Fail.grpc_fail"));
    assert_eq!(sink.groups().len(), 1);
    assert_eq!(sink.groups()[0].name, "gRPC (localhost:10000)");
    assert_eq!(sink.dropped(), 0);
}

/// Stream establishment is counted, and the handle behaves like the raw stream
#[tokio::test]
async fn test_stream_scenario() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let mut stream = conn
        .new_stream(
            &StreamDescriptor::server_streaming("List"),
            "List",
            &CallOptions::default(),
        )
        .await
        .unwrap();

    let mut got = vec![];
    while let Some(msg) = stream.recv().await.unwrap() {
        got.push(msg[0]);
    }

    assert_eq!(got, vec![0, 1, 2]);
    assert_eq!(sink.counter("List.new_stream_ok"), Some(1));
    assert_eq!(sink.counter("List.new_stream_fail"), Some(0));
    assert_eq!(sink.samples("List.new_stream_latency").unwrap().len(), 1);
    assert!(sink
        .groups()
        .iter()
        .any(|g| g.name == "gRPC stream (localhost:10000)"));
    // No unary series for a stream-only method
    assert!(!sink.is_registered("List.grpc_ok"));
}

/// Bidirectional traffic is forwarded unchanged in both directions
#[tokio::test]
async fn test_bidi_stream_passthrough() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let mut stream = conn
        .new_stream(&StreamDescriptor::bidi("Chat"), "Chat", &CallOptions::default())
        .await
        .unwrap();

    for note in [&b"first"[..], &b"second"[..]] {
        stream.send(Bytes::copy_from_slice(note)).await.unwrap();
        assert_eq!(stream.recv().await, Ok(Some(Bytes::copy_from_slice(note))));
    }
    stream.close_send().await.unwrap();
    assert_eq!(stream.recv().await, Ok(None));
    assert_eq!(stream.method(), "Chat");
}

/// Failed stream establishment returns the transport error and no handle
#[tokio::test]
async fn test_stream_establishment_failure() {
    let sink = Arc::new(DashMapMetricsSink::new());
    let conn = dial(sink.clone()).await;

    let result = conn
        .new_stream(&StreamDescriptor::bidi("Nope"), "Nope", &CallOptions::default())
        .await;

    let err = result.err().unwrap();
    assert_eq!(err.code, Code::Unimplemented);
    assert_eq!(sink.counter("Nope.new_stream_fail"), Some(1));
    assert_eq!(sink.counter("Nope.new_stream_ok"), Some(0));
}

/// A sink that refuses registrations never breaks the call path
#[tokio::test]
async fn test_rejecting_sink_is_non_fatal() {
    let sink = Arc::new(DashMapMetricsSink::rejecting(SinkError::Rejected(
        "quota".to_string(),
    )));
    let conn = dial(sink.clone()).await;

    for _ in 0..3 {
        let resp = conn
            .invoke("Get", Bytes::from_static(b"x"), &CallOptions::default())
            .await;
        assert_eq!(resp, Ok(Bytes::from_static(b"x")));
    }

    assert_eq!(sink.setup_calls(), 1);
    assert_eq!(sink.dropped(), 0);
    assert!(!conn.registry().is_registered(CallKind::Unary, "Get"));
    assert_eq!(conn.registry().stats().failed, 1);
}

/// Dial errors and lifecycle are the transport's own
#[tokio::test]
async fn test_dial_and_lifecycle_passthrough() {
    let dialer = InProcessDialer::new();
    let sink: Arc<dyn MetricsSink> = Arc::new(DashMapMetricsSink::new());

    let opts = DialOptions::blocking().with_timeout(Duration::from_millis(20));
    let err = InstrumentedConnection::dial(&dialer, "nowhere:1", &opts, sink.clone())
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, Code::DeadlineExceeded);

    // Non-blocking dial succeeds; calls then fail with the transport error.
    let conn = InstrumentedConnection::dial(&dialer, "nowhere:1", &DialOptions::default(), sink)
        .await
        .unwrap();
    assert_eq!(conn.state(), ConnectivityState::TransientFailure);
    let err = tokio_test::assert_err!(
        conn.invoke("Get", Bytes::new(), &CallOptions::default())
            .await
    );
    assert_eq!(err.code, Code::Unavailable);

    tokio_test::assert_ok!(conn.close().await);
    assert_eq!(conn.state(), ConnectivityState::Shutdown);
}

/// Each dial starts with its own empty registry
#[tokio::test]
async fn test_redial_registers_again() {
    let sink = Arc::new(DashMapMetricsSink::new());

    let first = dial(sink.clone()).await;
    first
        .invoke("Get", Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    let second = dial(sink.clone()).await;
    assert!(second.registry().is_empty());
    second
        .invoke("Get", Bytes::new(), &CallOptions::default())
        .await
        .unwrap();

    assert_eq!(sink.setup_calls(), 2);
    assert_eq!(sink.counter("Get.grpc_ok"), Some(2));
}
