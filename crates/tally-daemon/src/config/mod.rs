//! Daemon config loader (strict parsing) and command-line overrides.

pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use tally_core::error::{Result, TallyError};

pub use schema::{DaemonConfig, DaemonSection};

/// Read and validate a config file.
pub fn load_from_file(path: &Path) -> Result<DaemonConfig> {
    let cfg = parse_file(path)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn load_from_str(s: &str) -> Result<DaemonConfig> {
    let cfg = parse_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Strict parse without validation, for configs that flags complete later.
pub fn parse_file(path: &Path) -> Result<DaemonConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| TallyError::Config(format!("read config {} failed: {e}", path.display())))?;
    parse_str(&s)
}

pub fn parse_str(s: &str) -> Result<DaemonConfig> {
    serde_yaml::from_str(s).map_err(|e| TallyError::Config(format!("invalid yaml: {e}")))
}

/// Command line. Flags override the matching keys of `--config`.
#[derive(Debug, Parser)]
#[command(name = "tally-daemon", version, about = "Local multi-process metrics aggregation daemon")]
pub struct Cli {
    /// YAML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the unix socket to listen on for incoming metrics
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Path to the JSON file with metric definitions
    #[arg(long)]
    pub metrics: Option<PathBuf>,

    /// Address to serve Prometheus scrapes on
    #[arg(long)]
    pub addr: Option<String>,

    /// HTTP path for Prometheus scrapes
    #[arg(long)]
    pub path: Option<String>,

    /// Log file; stdout when omitted
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Number of ingestion workers
    #[arg(long)]
    pub workers: Option<usize>,
}

impl Cli {
    /// Resolve the effective config: file (or defaults), then flags, then
    /// validation of the merged result.
    pub fn into_config(self) -> Result<DaemonConfig> {
        let mut cfg = match &self.config {
            Some(path) => parse_file(path)?,
            None => DaemonConfig::default(),
        };

        let d = &mut cfg.daemon;
        if let Some(v) = self.socket {
            d.socket = v;
        }
        if let Some(v) = self.metrics {
            d.metrics = Some(v);
        }
        if let Some(v) = self.addr {
            d.addr = v;
        }
        if let Some(v) = self.path {
            d.path = v;
        }
        if let Some(v) = self.log {
            d.log = Some(v);
        }
        if let Some(v) = self.workers {
            d.workers = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}
