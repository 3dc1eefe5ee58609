//! Metric definitions and the spec loader.
//!
//! The loader only parses: it keeps source order and rejects malformed JSON
//! or unknown keys, but leaves naming rules, label sets and kind-specific
//! fields to [`validate`], which the registry runs on every registration.

pub mod validate;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Aggregation kind. Whether a metric is a vector follows from its labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One metric definition from the spec source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub name: String,
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Histogram bucket upper bounds. `None` selects the default ladder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
    /// Summary objectives, quantile (as a string key) to tolerated error.
    /// `None` selects the default objectives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<BTreeMap<String, f64>>,
}

impl MetricSpec {
    pub fn new(kind: MetricKind, name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            help: help.into(),
            labels: Vec::new(),
            buckets: None,
            objectives: None,
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// A vector metric materializes one child per distinct label-value tuple.
    pub fn is_vector(&self) -> bool {
        !self.labels.is_empty()
    }
}

pub fn load_from_file(path: impl AsRef<Path>) -> Result<Vec<MetricSpec>> {
    let path = path.as_ref();
    let s = fs::read_to_string(path).map_err(|e| {
        TallyError::Config(format!("read metric specs failed ({}): {e}", path.display()))
    })?;
    let specs = load_from_str(&s)?;
    tracing::debug!(path = %path.display(), count = specs.len(), "metric specs loaded");
    Ok(specs)
}

pub fn load_from_reader<R: Read>(mut r: R) -> Result<Vec<MetricSpec>> {
    let mut s = String::new();
    r.read_to_string(&mut s)
        .map_err(|e| TallyError::Config(format!("read metric specs failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<Vec<MetricSpec>> {
    serde_json::from_str(s).map_err(|e| TallyError::Config(format!("invalid metric specs: {e}")))
}

/// First name that appears more than once, if any.
pub fn find_duplicate(specs: &[MetricSpec]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(specs.len());
    specs
        .iter()
        .map(|s| s.name.as_str())
        .find(|name| !seen.insert(*name))
}
