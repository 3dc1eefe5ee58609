#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};

use tally_core::Result;
use tally_daemon::app_state::AppState;
use tally_daemon::config;
use tally_daemon::daemon;
use tally_daemon::logging::LogHandle;

struct Running {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    state: AppState,
    task: tokio::task::JoinHandle<Result<()>>,
}

async fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("tally.sock");
    let metrics = dir.path().join("metrics.json");
    std::fs::write(&metrics, r#"[{"type": "counter", "name": "c", "help": "count"}]"#).unwrap();

    let cfg = config::load_from_str(&format!(
        "version: 1\ndaemon:\n  socket: {}\n  metrics: {}\n  addr: 127.0.0.1:0\n  workers: 1\n",
        socket.display(),
        metrics.display()
    ))
    .unwrap();
    let state = AppState::new(cfg, LogHandle::stdout()).unwrap();
    let task = tokio::spawn(daemon::run(state.clone()));

    wait_until(|| socket.exists()).await;
    Running {
        _dir: dir,
        socket,
        state,
        task,
    }
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held");
}

async fn assert_stopped(socket: &Path) {
    assert!(!socket.exists(), "socket file left behind");
    assert!(UnixStream::connect(socket).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_error_exits_with_err_and_removes_socket() {
    let d = start().await;

    d.state.fatal().cancel();
    let outcome = timeout(Duration::from_secs(10), d.task)
        .await
        .expect("daemon did not stop")
        .unwrap();

    let err = outcome.expect_err("fatal must surface as an error");
    assert_eq!(err.class().as_str(), "FATAL");
    assert!(d.state.shutdown().is_cancelled());
    assert_stopped(&d.socket).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_exits_cleanly_and_removes_socket() {
    let d = start().await;

    // the pipeline is live before the stop
    let mut s = UnixStream::connect(&d.socket).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(&mut s, br#"{"name": "c", "method": "inc"}"#)
        .await
        .unwrap();
    drop(s);
    let registry = d.state.registry();
    wait_until(|| registry.render().unwrap().contains("c 1\n")).await;

    d.state.shutdown().cancel();
    let outcome = timeout(Duration::from_secs(10), d.task)
        .await
        .expect("daemon did not stop")
        .unwrap();

    assert!(outcome.is_ok(), "{outcome:?}");
    assert!(!d.state.fatal().is_cancelled());
    assert_stopped(&d.socket).await;
}

#[tokio::test]
async fn busy_socket_path_fails_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("tally.sock");
    let metrics = dir.path().join("metrics.json");
    std::fs::write(&metrics, "[]").unwrap();
    std::fs::write(&socket, b"not a socket").unwrap();

    let cfg = config::load_from_str(&format!(
        "version: 1\ndaemon:\n  socket: {}\n  metrics: {}\n  addr: 127.0.0.1:0\n",
        socket.display(),
        metrics.display()
    ))
    .unwrap();
    let state = AppState::new(cfg, LogHandle::stdout()).unwrap();

    let err = daemon::run(state).await.expect_err("must fail");
    assert_eq!(err.class().as_str(), "FATAL");
    assert!(socket.exists());
}
