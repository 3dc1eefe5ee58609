#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use clap::Parser;
use tally_daemon::config::{self, Cli};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
daemon:
  metrics: "/etc/tally/metrics.json"
  sockett: "/tmp/x.sock" # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
daemon:
  metrics: "/etc/tally/metrics.json"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.daemon.path, "/metrics");
    assert_eq!(cfg.daemon.addr, "0.0.0.0:9299");
    assert_eq!(cfg.daemon.queue_capacity, 0);
    assert!(cfg.daemon.log.is_none());
}

#[test]
fn metrics_file_is_required() {
    let err = config::load_from_str("version: 1\n").expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}

#[test]
fn out_of_range_values_rejected() {
    for bad in [
        "version: 1\ndaemon: { metrics: m.json, workers: 0 }\n",
        "version: 1\ndaemon: { metrics: m.json, path: metrics }\n",
        "version: 1\ndaemon: { metrics: m.json, path: /healthz }\n",
        "version: 1\ndaemon: { metrics: m.json, addr: 'not an addr' }\n",
        "version: 1\ndaemon: { metrics: m.json, read_timeout_ms: 1 }\n",
        "version: 2\ndaemon: { metrics: m.json }\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert_eq!(err.class().as_str(), "CONFIG", "{bad}");
    }
}

#[test]
fn flags_override_defaults() {
    let cli = Cli::try_parse_from([
        "tally-daemon",
        "--metrics",
        "/etc/tally/metrics.json",
        "--socket",
        "/run/tally.sock",
        "--addr",
        "127.0.0.1:9000",
        "--workers",
        "3",
    ])
    .unwrap();
    let cfg = cli.into_config().unwrap();
    assert_eq!(cfg.daemon.socket.to_str(), Some("/run/tally.sock"));
    assert_eq!(cfg.daemon.addr, "127.0.0.1:9000");
    assert_eq!(cfg.daemon.workers, 3);
}

#[test]
fn flags_override_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.yaml");
    std::fs::write(
        &path,
        "version: 1\ndaemon:\n  metrics: from-file.json\n  path: /scrape\n",
    )
    .unwrap();

    let cli = Cli::try_parse_from([
        "tally-daemon",
        "--config",
        path.to_str().unwrap(),
        "--metrics",
        "from-flag.json",
    ])
    .unwrap();
    let cfg = cli.into_config().unwrap();
    assert_eq!(cfg.daemon.metrics.unwrap().to_str(), Some("from-flag.json"));
    assert_eq!(cfg.daemon.path, "/scrape");
}

#[test]
fn load_from_file_validates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tally.yaml");

    std::fs::write(&path, "version: 1\ndaemon:\n  metrics: m.json\n  workers: 2\n").unwrap();
    let cfg = config::load_from_file(&path).unwrap();
    assert_eq!(cfg.daemon.workers, 2);

    // complete only once flags are applied, so the file alone is rejected
    std::fs::write(&path, "version: 1\ndaemon:\n  workers: 2\n").unwrap();
    let err = config::load_from_file(&path).expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
    assert_eq!(config::parse_file(&path).unwrap().daemon.workers, 2);
}

#[test]
fn missing_config_file_is_a_config_error() {
    let cli = Cli::try_parse_from(["tally-daemon", "--config", "/nonexistent/tally.yaml"]).unwrap();
    let err = cli.into_config().expect_err("must fail");
    assert_eq!(err.class().as_str(), "CONFIG");
}
