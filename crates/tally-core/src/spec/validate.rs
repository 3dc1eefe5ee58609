//! Semantic checks and defaults for metric specs.
//!
//! Naming follows the Prometheus data model: metric names match
//! `[a-zA-Z_:][a-zA-Z0-9_:]*`, label names match `[a-zA-Z_][a-zA-Z0-9_]*`
//! and must not start with `__`.

use std::collections::HashSet;

use crate::error::{Result, TallyError};
use crate::spec::{MetricKind, MetricSpec};

/// Default histogram ladder (seconds-scale latencies).
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Default summary objectives as `(quantile, tolerated error)`.
pub const DEFAULT_OBJECTIVES: [(f64, f64); 3] = [(0.5, 0.05), (0.9, 0.01), (0.99, 0.001)];

/// Run every check `Registry::register` needs before building a metric.
pub fn validate_spec(spec: &MetricSpec) -> Result<()> {
    validate_name(&spec.name)?;
    if spec.help.trim().is_empty() {
        return Err(TallyError::Validation(format!(
            "metric {} must have a help text",
            spec.name
        )));
    }
    validate_labels(&spec.labels)?;

    if spec.buckets.is_some() && spec.kind != MetricKind::Histogram {
        return Err(TallyError::Validation(format!(
            "metric {}: buckets are only valid for histograms",
            spec.name
        )));
    }
    if spec.objectives.is_some() && spec.kind != MetricKind::Summary {
        return Err(TallyError::Validation(format!(
            "metric {}: objectives are only valid for summaries",
            spec.name
        )));
    }

    match spec.kind {
        MetricKind::Histogram => {
            reject_reserved_label(spec, "le")?;
            histogram_buckets(spec)?;
        }
        MetricKind::Summary => {
            reject_reserved_label(spec, "quantile")?;
            summary_objectives(spec)?;
        }
        MetricKind::Counter | MetricKind::Gauge => {}
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if !valid {
        return Err(TallyError::Validation(format!("metric name '{name}' is not valid")));
    }
    Ok(())
}

pub fn validate_label_name(label: &str) -> Result<()> {
    let mut chars = label.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !valid || label.starts_with("__") {
        return Err(TallyError::Validation(format!("label name '{label}' is not valid")));
    }
    Ok(())
}

/// Every label valid and no label repeated.
pub fn validate_labels(labels: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        validate_label_name(label)?;
        if !seen.insert(label.as_str()) {
            return Err(TallyError::Validation(format!("duplicate label found: {label}")));
        }
    }
    Ok(())
}

fn reject_reserved_label(spec: &MetricSpec, reserved: &str) -> Result<()> {
    if spec.labels.iter().any(|l| l == reserved) {
        return Err(TallyError::Validation(format!(
            "metric {}: label '{reserved}' is reserved for {}s",
            spec.name, spec.kind
        )));
    }
    Ok(())
}

/// Explicit buckets, or the default ladder when the field is absent.
pub fn histogram_buckets(spec: &MetricSpec) -> Result<Vec<f64>> {
    let Some(buckets) = &spec.buckets else {
        return Ok(DEFAULT_BUCKETS.to_vec());
    };
    if buckets.is_empty() {
        return Err(TallyError::Validation(format!(
            "histogram {}: buckets must not be empty",
            spec.name
        )));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(TallyError::Validation(format!(
            "histogram {}: buckets must be finite",
            spec.name
        )));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(TallyError::Validation(format!(
            "histogram {}: buckets must be strictly ascending",
            spec.name
        )));
    }
    Ok(buckets.clone())
}

/// Parsed objectives sorted by quantile, or the defaults when absent.
///
/// An explicit empty map is kept: the summary then reports only its sample
/// count and sum.
pub fn summary_objectives(spec: &MetricSpec) -> Result<Vec<(f64, f64)>> {
    let Some(objectives) = &spec.objectives else {
        return Ok(DEFAULT_OBJECTIVES.to_vec());
    };

    let mut out = Vec::with_capacity(objectives.len());
    for (key, &tolerance) in objectives {
        let quantile: f64 = key.trim().parse().map_err(|_| {
            TallyError::Validation(format!(
                "summary {}: objective key '{key}' is not a number",
                spec.name
            ))
        })?;
        if !(0.0..=1.0).contains(&quantile) {
            return Err(TallyError::Validation(format!(
                "summary {}: objective quantile {quantile} is outside [0, 1]",
                spec.name
            )));
        }
        if !(0.0..=1.0).contains(&tolerance) {
            return Err(TallyError::Validation(format!(
                "summary {}: objective tolerance {tolerance} is outside [0, 1]",
                spec.name
            )));
        }
        out.push((quantile, tolerance));
    }

    out.sort_by(|a, b| a.0.total_cmp(&b.0));
    if out.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(TallyError::Validation(format!(
            "summary {}: objective quantiles must be distinct",
            spec.name
        )));
    }
    Ok(out)
}
