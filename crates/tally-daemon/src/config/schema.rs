use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tally_core::error::{Result, TallyError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonConfig {
    pub version: u32,

    #[serde(default)]
    pub daemon: DaemonSection,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            version: 1,
            daemon: DaemonSection::default(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(TallyError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }

        self.daemon.validate()?;   // Verify the scope of value

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaemonSection {
    /// Unix socket clients push updates to.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,

    /// JSON metric-definition file. Required, from the file or `--metrics`.
    #[serde(default)]
    pub metrics: Option<PathBuf>,

    /// Scrape listener address.
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Scrape path.
    #[serde(default = "default_path")]
    pub path: String,

    /// Log file; stdout when absent.
    #[serde(default)]
    pub log: Option<PathBuf>,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// 0 = rendezvous hand-off.
    #[serde(default)]
    pub queue_capacity: usize,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            metrics: None,
            addr: default_addr(),
            path: default_path(),
            log: None,
            workers: default_workers(),
            queue_capacity: 0,
            max_payload_bytes: default_max_payload_bytes(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl DaemonSection {
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_none() {
            return Err(TallyError::Config(
                "daemon.metrics (or --metrics) must name the metric spec file".into(),
            ));
        }
        if self.socket.as_os_str().is_empty() {
            return Err(TallyError::Config("daemon.socket must not be empty".into()));
        }
        self.listen_addr()?;
        if !self.path.starts_with('/') {
            return Err(TallyError::Config("daemon.path must start with '/'".into()));
        }
        if self.path == "/healthz" {
            return Err(TallyError::Config("daemon.path must not shadow /healthz".into()));
        }
        if self.workers == 0 {
            return Err(TallyError::Config("daemon.workers must be at least 1".into()));
        }
        if !(1024..=64 * 1024 * 1024).contains(&self.max_payload_bytes) {
            return Err(TallyError::Config(
                "daemon.max_payload_bytes must be between 1024 and 67108864".into(),
            ));
        }
        if !(100..=600000).contains(&self.read_timeout_ms) {
            return Err(TallyError::Config(
                "daemon.read_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.addr
            .parse()
            .map_err(|e| TallyError::Config(format!("daemon.addr '{}' is invalid: {e}", self.addr)))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn default_socket() -> PathBuf {
    PathBuf::from("/tmp/tally.sock")
}
fn default_addr() -> String {
    "0.0.0.0:9299".into()
}
fn default_path() -> String {
    "/metrics".into()
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
fn default_max_payload_bytes() -> usize {
    1024 * 1024
}
fn default_read_timeout_ms() -> u64 {
    5000
}
