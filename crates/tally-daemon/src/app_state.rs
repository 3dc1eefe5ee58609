//! Shared daemon context.
//!
//! Built once at startup and passed to every component; there are no
//! process-wide singletons. Startup errors are explicit (Result instead of
//! panic).

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tally_core::error::{Result, TallyError};
use tally_core::spec;

use crate::config::DaemonConfig;
use crate::logging::LogHandle;
use crate::pipeline::PipelineStats;
use crate::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: DaemonConfig,
    registry: Arc<Registry>,
    stats: Arc<PipelineStats>,
    log: LogHandle,
    shutdown: CancellationToken,
    fatal: CancellationToken,
}

impl AppState {
    /// Load the metric specs named by `cfg` and register them. Any spec error
    /// is fatal at startup.
    pub fn new(cfg: DaemonConfig, log: LogHandle) -> Result<Self> {
        let path = cfg
            .daemon
            .metrics
            .clone()
            .ok_or_else(|| TallyError::Config("no metric spec file configured".into()))?;
        let specs = spec::load_from_file(&path)?;

        let registry = Registry::new();
        let n = registry.register_all(specs)?;
        tracing::info!(path = %path.display(), metrics = n, "metric specs registered");

        Ok(Self::with_registry(cfg, log, Arc::new(registry)))
    }

    pub fn with_registry(cfg: DaemonConfig, log: LogHandle, registry: Arc<Registry>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                stats: Arc::new(PipelineStats::default()),
                log,
                shutdown: CancellationToken::new(),
                fatal: CancellationToken::new(),
            }),
        }
    }

    pub fn cfg(&self) -> &DaemonConfig {
        &self.inner.cfg
    }

    pub fn spec_path(&self) -> Option<&Path> {
        self.inner.cfg.daemon.metrics.as_deref()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn log(&self) -> &LogHandle {
        &self.inner.log
    }

    /// Cancelled when the daemon is asked to stop.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Cancelled when a processor panicked.
    pub fn fatal(&self) -> &CancellationToken {
        &self.inner.fatal
    }
}
