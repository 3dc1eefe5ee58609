//! Hot reload of metric definitions.
//!
//! A reload re-reads the spec file, registers every spec it names, drops the
//! names it no longer mentions, and rotates the processor generation. Metrics
//! present before and after keep their accumulated state: their
//! re-registration fails with `AlreadyRegistered`, which is the expected
//! outcome here. The listener and workers are untouched.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tally_core::error::Result;
use tally_core::spec::{self, MetricSpec};
use tally_core::MetricUpdate;

use crate::pipeline::{Generation, PipelineStats};
use crate::registry::Registry;

/// Outcome of one reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Newly registered names.
    pub added: Vec<String>,
    /// Names already live; state preserved.
    pub unchanged: Vec<String>,
    /// Names unregistered because the new set no longer lists them.
    pub removed: Vec<String>,
    /// Names whose new spec failed validation (or repeated an earlier entry).
    pub rejected: Vec<String>,
    /// Processor generation running after the reload.
    pub generation: u64,
}

/// Register `specs` against `registry` and unregister whatever in `old` the
/// new set does not name. Steps 3 and 4 of a reload.
pub fn apply_specs(
    registry: &Registry,
    old: &BTreeSet<String>,
    specs: Vec<MetricSpec>,
) -> ReloadReport {
    let mut report = ReloadReport::default();
    let mut listed: HashSet<String> = HashSet::with_capacity(specs.len());

    for s in specs {
        let name = s.name.clone();
        if !listed.insert(name.clone()) {
            tracing::warn!(metric = %name, "metric defined more than once, skipping repeat");
            report.rejected.push(name);
            continue;
        }
        match registry.register(s) {
            Ok(()) => report.added.push(name),
            Err(e) if e.is_already_registered() => {
                tracing::info!(metric = %name, "metric already registered, not updating");
                report.unchanged.push(name);
            }
            Err(e) => {
                tracing::warn!(metric = %name, error = %e, "metric spec rejected");
                report.rejected.push(name);
            }
        }
    }

    for name in old.iter().filter(|n| !listed.contains(*n)) {
        match registry.unregister(name) {
            Ok(()) => report.removed.push(name.clone()),
            Err(e) => tracing::warn!(metric = %name, error = %e, "unregister failed"),
        }
    }
    report
}

/// Owns the processor generation and performs reloads.
pub struct ReloadController {
    registry: Arc<Registry>,
    spec_path: PathBuf,
    updates: flume::Receiver<MetricUpdate>,
    stats: Arc<PipelineStats>,
    fatal: CancellationToken,
    generation: Option<Generation>,
    last_generation: u64,
}

impl ReloadController {
    pub fn new(
        registry: Arc<Registry>,
        spec_path: impl Into<PathBuf>,
        updates: flume::Receiver<MetricUpdate>,
        stats: Arc<PipelineStats>,
        fatal: CancellationToken,
    ) -> Self {
        Self {
            registry,
            spec_path: spec_path.into(),
            updates,
            stats,
            fatal,
            generation: None,
            last_generation: 0,
        }
    }

    /// Id of the running generation, if any.
    pub fn generation(&self) -> Option<u64> {
        self.generation.as_ref().map(Generation::id)
    }

    /// Start the first generation. No-op when one is running.
    pub fn start(&mut self) {
        if self.generation.is_none() {
            self.generation = Some(self.spawn_next());
        }
    }

    /// Full reload from the spec file. A file that cannot be read or parsed
    /// aborts the reload and leaves the registry and generation untouched.
    pub async fn reload(&mut self) -> Result<ReloadReport> {
        tracing::info!(path = %self.spec_path.display(), "reloading metric specs");
        let specs = spec::load_from_file(&self.spec_path).map_err(|e| {
            tracing::error!(error = %e, "reload aborted, keeping current metrics");
            e
        })?;
        Ok(self.apply(specs).await)
    }

    /// Reload from an already-parsed spec set.
    pub async fn apply(&mut self, specs: Vec<MetricSpec>) -> ReloadReport {
        let old = self.registry.names();
        let mut report = apply_specs(&self.registry, &old, specs);

        if let Some(current) = self.generation.take() {
            current.stop().await;
        }
        let next = self.spawn_next();
        report.generation = next.id();
        self.generation = Some(next);

        tracing::info!(
            added = report.added.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            rejected = report.rejected.len(),
            generation = report.generation,
            "reload complete"
        );
        report
    }

    /// Stop the running generation, draining what it already holds.
    pub async fn shutdown(&mut self) {
        if let Some(current) = self.generation.take() {
            current.stop().await;
        }
    }

    fn spawn_next(&mut self) -> Generation {
        self.last_generation += 1;
        Generation::spawn(
            self.last_generation,
            Arc::clone(&self.registry),
            self.updates.clone(),
            Arc::clone(&self.stats),
            self.fatal.clone(),
        )
    }
}
