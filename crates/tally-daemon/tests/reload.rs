#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tally_core::{spec, MetricUpdate};
use tally_daemon::pipeline::PipelineStats;
use tally_daemon::registry::Registry;
use tally_daemon::reload::ReloadController;

fn write_counters(path: &Path, names: &[&str]) {
    let specs: Vec<serde_json::Value> = names
        .iter()
        .map(|n| serde_json::json!({ "type": "counter", "name": n, "help": format!("{n} total") }))
        .collect();
    std::fs::write(path, serde_json::to_vec(&specs).unwrap()).unwrap();
}

struct Fixture {
    _dir: tempfile::TempDir,
    path: std::path::PathBuf,
    registry: Arc<Registry>,
    tx: flume::Sender<MetricUpdate>,
    ctl: ReloadController,
    fatal: CancellationToken,
}

fn fixture(initial: &[&str]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.json");
    write_counters(&path, initial);

    let registry = Arc::new(Registry::new());
    registry
        .register_all(spec::load_from_file(&path).unwrap())
        .unwrap();

    let (tx, rx) = flume::bounded(0);
    let fatal = CancellationToken::new();
    let mut ctl = ReloadController::new(
        Arc::clone(&registry),
        &path,
        rx,
        Arc::new(PipelineStats::default()),
        fatal.clone(),
    );
    ctl.start();

    Fixture {
        _dir: dir,
        path,
        registry,
        tx,
        ctl,
        fatal,
    }
}

#[tokio::test]
async fn reload_keeps_unchanged_and_drops_removed() {
    let mut f = fixture(&["a", "b", "c"]);
    assert_eq!(f.ctl.generation(), Some(1));

    for _ in 0..5 {
        f.tx.send_async(MetricUpdate::new("a", "inc", 0.0)).await.unwrap();
    }
    f.tx.send_async(MetricUpdate::new("b", "inc", 0.0)).await.unwrap();

    write_counters(&f.path, &["a", "d"]);
    let report = f.ctl.reload().await.unwrap();

    assert_eq!(report.added, vec!["d"]);
    assert_eq!(report.unchanged, vec!["a"]);
    assert_eq!(report.removed, vec!["b", "c"]);
    assert!(report.rejected.is_empty());
    assert_eq!(report.generation, 2);
    assert_eq!(f.ctl.generation(), Some(2));

    let names: Vec<String> = f.registry.names().into_iter().collect();
    assert_eq!(names, vec!["a", "d"]);

    let out = f.registry.render().unwrap();
    assert!(out.contains("a 5\n"), "{out}");
    assert!(out.contains("d 0\n"), "{out}");
    assert!(!out.contains("b 1"), "{out}");

    f.ctl.shutdown().await;
    assert!(!f.fatal.is_cancelled());
}

#[tokio::test]
async fn unreadable_spec_file_keeps_current_set() {
    let mut f = fixture(&["a"]);

    std::fs::write(&f.path, b"[{ not json").unwrap();
    let err = f.ctl.reload().await.expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
    assert_eq!(f.ctl.generation(), Some(1));
    assert!(f.registry.names().contains("a"));

    // the surviving generation still applies updates
    f.tx.send_async(MetricUpdate::new("a", "inc", 0.0)).await.unwrap();
    f.ctl.shutdown().await;
    assert!(f.registry.render().unwrap().contains("a 1\n"));
}

#[tokio::test]
async fn invalid_specs_are_skipped_not_fatal() {
    let mut f = fixture(&["a"]);

    let specs = serde_json::json!([
        { "type": "counter", "name": "a", "help": "a total" },
        { "type": "counter", "name": "bad name", "help": "x" },
        { "type": "gauge", "name": "e", "help": "e level" },
        { "type": "gauge", "name": "e", "help": "repeat" },
    ]);
    std::fs::write(&f.path, serde_json::to_vec(&specs).unwrap()).unwrap();

    let report = f.ctl.reload().await.unwrap();
    assert_eq!(report.added, vec!["e"]);
    assert_eq!(report.rejected, vec!["bad name", "e"]);
    assert_eq!(report.generation, 2);
    f.ctl.shutdown().await;
}

#[tokio::test]
async fn removed_name_can_return_with_new_labels() {
    let mut f = fixture(&["a", "b"]);

    write_counters(&f.path, &["a"]);
    f.ctl.reload().await.unwrap();

    let specs = serde_json::json!([
        { "type": "counter", "name": "a", "help": "a total" },
        { "type": "counter", "name": "b", "help": "b by kind", "labels": ["kind"] },
    ]);
    std::fs::write(&f.path, serde_json::to_vec(&specs).unwrap()).unwrap();
    let report = f.ctl.reload().await.unwrap();
    assert_eq!(report.added, vec!["b"]);
    assert_eq!(report.generation, 3);

    f.tx.send_async(MetricUpdate::new("b", "inc", 0.0).with_labels(["x"]))
        .await
        .unwrap();
    f.ctl.shutdown().await;
    assert!(f.registry.render().unwrap().contains(r#"b{kind="x"} 1"#));
}

#[tokio::test]
async fn rotation_loses_no_updates() {
    let mut f = fixture(&["a"]);

    let tx = f.tx.clone();
    let sender = tokio::spawn(async move {
        for _ in 0..200 {
            tx.send_async(MetricUpdate::new("a", "inc", 0.0)).await.unwrap();
        }
    });

    for _ in 0..3 {
        f.ctl.reload().await.unwrap();
        tokio::task::yield_now().await;
    }
    sender.await.unwrap();
    f.ctl.shutdown().await;

    assert!(f.registry.render().unwrap().contains("a 200\n"));
    assert_eq!(f.ctl.generation(), None);
}
