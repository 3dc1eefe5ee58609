//! Metric registry: name → handler.
//!
//! The name map is a `DashMap`, i.e. sharded reader/writer locks. `handle`
//! clones the handler `Arc` under a shared guard and releases it before the
//! update is applied. `register` and `unregister` go through the entry API,
//! which holds the exclusive guard of the affected shard, so insert-if-absent
//! and remove are atomic per name.
//!
//! Exposition is gathered straight from the handlers rather than through a
//! `prometheus::Registry`: that registry pins a name's label set and help for
//! the life of the process, which would forbid redefining a metric through
//! unregister + register.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};

use tally_core::error::{Result, TallyError};
use tally_core::spec::{self, MetricSpec};
use tally_core::MetricUpdate;

use crate::metric::MetricHandler;

#[derive(Default)]
pub struct Registry {
    handlers: DashMap<String, Arc<MetricHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Validate, build and insert a metric. Never replaces a live name.
    pub fn register(&self, spec: MetricSpec) -> Result<()> {
        let handler = MetricHandler::new(spec)?;
        match self.handlers.entry(handler.name().to_string()) {
            Entry::Occupied(e) => Err(TallyError::AlreadyRegistered(e.key().clone())),
            Entry::Vacant(slot) => {
                tracing::info!(
                    metric = %handler.name(),
                    kind = %handler.kind(),
                    labels = handler.spec().labels.len(),
                    "registered"
                );
                slot.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    /// Register a whole startup set; any failure, including a name repeated
    /// within `specs`, aborts with that error.
    pub fn register_all(&self, specs: Vec<MetricSpec>) -> Result<usize> {
        if let Some(dup) = spec::find_duplicate(&specs) {
            return Err(TallyError::Validation(format!(
                "metric {dup} is defined more than once"
            )));
        }
        let n = specs.len();
        for s in specs {
            self.register(s)?;
        }
        Ok(n)
    }

    /// Remove a metric and release its aggregate.
    pub fn unregister(&self, name: &str) -> Result<()> {
        self.handlers
            .remove(name)
            .ok_or_else(|| TallyError::NotFound(name.to_string()))?;
        tracing::info!(metric = %name, "unregistered");
        Ok(())
    }

    /// Point-in-time snapshot of registered names.
    pub fn names(&self) -> BTreeSet<String> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<MetricHandler>> {
        self.handlers.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route one update to its handler. Handler errors pass through unchanged.
    pub fn handle(&self, u: &MetricUpdate) -> Result<()> {
        let handler = self
            .get(&u.name)
            .ok_or_else(|| TallyError::NotFound(u.name.clone()))?;
        handler.handle(u)
    }

    /// Collect every metric family, sorted by name, skipping vectors that
    /// have no children yet.
    pub fn gather(&self) -> Vec<MetricFamily> {
        let handlers: Vec<Arc<MetricHandler>> =
            self.handlers.iter().map(|e| Arc::clone(e.value())).collect();

        let mut families: Vec<MetricFamily> = handlers
            .iter()
            .flat_map(|h| h.collector().collect())
            .filter(|mf| !mf.get_metric().is_empty())
            .collect();

        for mf in &mut families {
            mf.mut_metric().sort_by(|a, b| {
                let a = a.get_label().iter().map(|l| l.get_value());
                let b = b.get_label().iter().map(|l| l.get_value());
                a.cmp(b)
            });
        }
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));
        families
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.gather(), &mut buf)
            .map_err(|e| TallyError::Internal(format!("encode metrics failed: {e}")))?;
        String::from_utf8(buf)
            .map_err(|e| TallyError::Internal(format!("metrics are not utf-8: {e}")))
    }
}
