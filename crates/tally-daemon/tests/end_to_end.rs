#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

use tally_core::{MetricKind, MetricSpec};
use tally_daemon::pipeline::{listener, Pipeline, PipelineSettings, PipelineStats};
use tally_daemon::registry::Registry;
use tally_daemon::reload::ReloadController;

async fn push(path: &std::path::Path, payload: &str) {
    let mut stream = UnixStream::connect(path).await.unwrap();
    stream.write_all(payload.as_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
}

async fn wait_for(registry: &Registry, needle: &str) -> String {
    let mut out = String::new();
    for _ in 0..200 {
        out = registry.render().unwrap();
        if out.contains(needle) {
            return out;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{needle:?} never appeared in:\n{out}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_to_scrape() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("tally.sock");

    let registry = Arc::new(Registry::new());
    registry
        .register_all(vec![
            MetricSpec::new(MetricKind::Counter, "c", "a counter"),
            MetricSpec::new(MetricKind::Gauge, "g", "a gauge").with_labels(["x", "y"]),
        ])
        .unwrap();

    let shutdown = CancellationToken::new();
    let stats = Arc::new(PipelineStats::default());
    let pipeline = Pipeline::spawn(
        listener::bind(&sock).unwrap(),
        PipelineSettings {
            workers: 2,
            queue_capacity: 0,
            max_payload_bytes: 64 * 1024,
            read_timeout: Duration::from_secs(2),
        },
        Arc::clone(&stats),
        shutdown.clone(),
    );
    let fatal = CancellationToken::new();
    let mut ctl = ReloadController::new(
        Arc::clone(&registry),
        dir.path().join("unused.json"),
        pipeline.updates(),
        Arc::clone(&stats),
        fatal.clone(),
    );
    ctl.start();

    for _ in 0..3 {
        push(&sock, r#"{"name": "c", "method": "inc"}"#).await;
    }
    wait_for(&registry, "c 3\n").await;

    push(
        &sock,
        r#"[{"name": "g", "label_values": ["a"], "method": "set", "value": 9},
            {"name": "g", "label_values": ["a", "b"], "method": "set", "value": 4}]"#,
    )
    .await;
    let out = wait_for(&registry, r#"g{x="a",y="b"} 4"#).await;
    assert!(!out.contains(" 9\n"), "{out}");

    // malformed payloads are dropped without disturbing anything else
    push(&sock, "{ nope").await;
    push(&sock, r#"{"name": "c", "method": "add", "value": 2}"#).await;
    wait_for(&registry, "c 5\n").await;

    // an element without a method is ignored, its siblings still apply
    push(&sock, r#"[{"name": "c", "method": "inc"}, {"name": "c", "value": null}]"#).await;
    wait_for(&registry, "c 6\n").await;

    assert_eq!(stats.accepted(), 7);
    assert!(stats.dropped() >= 1);

    shutdown.cancel();
    pipeline.join().await;
    ctl.shutdown().await;
    listener::remove_socket(&sock).unwrap();
    assert!(!sock.exists());
    assert!(!fatal.is_cancelled());
}

#[tokio::test]
async fn bind_replaces_stale_socket() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("tally.sock");

    let first = listener::bind(&sock).unwrap();
    drop(first);
    assert!(sock.exists());

    let _second = listener::bind(&sock).unwrap();
    UnixStream::connect(&sock).await.unwrap();
}

#[tokio::test]
async fn bind_refuses_regular_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-a-socket");
    std::fs::write(&path, b"keep me").unwrap();

    let err = listener::bind(&path).expect_err("must fail");
    assert_eq!(err.class().as_str(), "FATAL");
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}
