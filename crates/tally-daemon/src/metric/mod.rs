//! Metric handlers: one spec bound to one aggregation object.
//!
//! The eight kinds (scalar/vector × counter/gauge/histogram/summary) form a
//! closed set, so they are a single enum dispatched by one `match` instead of
//! a trait object per kind.
//!
//! Method handling is permissive: a verb a kind does not understand is logged
//! and ignored, never reported as an error. Label arity is checked before the
//! method is looked at, and a rejected update never touches the aggregate.

pub mod summary;

use std::time::{SystemTime, UNIX_EPOCH};

use prometheus::core::Collector;
use prometheus::{
    Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts,
};

use tally_core::error::{Result, TallyError};
use tally_core::spec::{validate, MetricKind, MetricSpec};
use tally_core::MetricUpdate;

pub use summary::{Summary, SummaryVec};

/// Aggregation object behind a handler.
#[derive(Clone)]
pub enum Aggregate {
    Counter(Counter),
    CounterVec(CounterVec),
    Gauge(Gauge),
    GaugeVec(GaugeVec),
    Histogram(Histogram),
    HistogramVec(HistogramVec),
    Summary { family: SummaryVec, child: Summary },
    SummaryVec(SummaryVec),
}

impl Aggregate {
    fn build(spec: &MetricSpec) -> Result<Self> {
        let labels: Vec<&str> = spec.labels.iter().map(String::as_str).collect();
        let built = match (spec.kind, spec.is_vector()) {
            (MetricKind::Counter, false) => {
                Counter::with_opts(Opts::new(&spec.name, &spec.help)).map(Aggregate::Counter)
            }
            (MetricKind::Counter, true) => {
                CounterVec::new(Opts::new(&spec.name, &spec.help), &labels)
                    .map(Aggregate::CounterVec)
            }
            (MetricKind::Gauge, false) => {
                Gauge::with_opts(Opts::new(&spec.name, &spec.help)).map(Aggregate::Gauge)
            }
            (MetricKind::Gauge, true) => {
                GaugeVec::new(Opts::new(&spec.name, &spec.help), &labels).map(Aggregate::GaugeVec)
            }
            (MetricKind::Histogram, vector) => {
                let opts = HistogramOpts::new(&spec.name, &spec.help)
                    .buckets(validate::histogram_buckets(spec)?);
                if vector {
                    HistogramVec::new(opts, &labels).map(Aggregate::HistogramVec)
                } else {
                    Histogram::with_opts(opts).map(Aggregate::Histogram)
                }
            }
            (MetricKind::Summary, vector) => {
                let objectives = validate::summary_objectives(spec)?;
                SummaryVec::new(&spec.name, &spec.help, &labels, objectives).and_then(|family| {
                    if vector {
                        Ok(Aggregate::SummaryVec(family))
                    } else {
                        let child = family.get_metric_with_label_values(&[])?;
                        Ok(Aggregate::Summary { family, child })
                    }
                })
            }
        };
        built.map_err(|e| TallyError::Validation(format!("metric {}: {e}", spec.name)))
    }

    fn collector(&self) -> Box<dyn Collector> {
        match self {
            Aggregate::Counter(m) => Box::new(m.clone()),
            Aggregate::CounterVec(m) => Box::new(m.clone()),
            Aggregate::Gauge(m) => Box::new(m.clone()),
            Aggregate::GaugeVec(m) => Box::new(m.clone()),
            Aggregate::Histogram(m) => Box::new(m.clone()),
            Aggregate::HistogramVec(m) => Box::new(m.clone()),
            Aggregate::Summary { family, .. } => Box::new(family.clone()),
            Aggregate::SummaryVec(m) => Box::new(m.clone()),
        }
    }
}

/// Decoded counter verb.
enum CounterOp {
    Inc,
    Add(f64),
}

/// Decoded gauge verb.
enum GaugeOp {
    Set(f64),
    Inc,
    Dec,
    Add(f64),
    Sub(f64),
    SetToCurrentTime,
}

/// One registered metric.
pub struct MetricHandler {
    spec: MetricSpec,
    aggregate: Aggregate,
}

impl MetricHandler {
    /// Validate `spec`, apply defaults and build the matching aggregate.
    pub fn new(spec: MetricSpec) -> Result<Self> {
        validate::validate_spec(&spec)?;
        let aggregate = Aggregate::build(&spec)?;
        Ok(Self { spec, aggregate })
    }

    pub fn spec(&self) -> &MetricSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> MetricKind {
        self.spec.kind
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    /// A handle on the aggregate for exposition. Clones share state with
    /// this handler.
    pub fn collector(&self) -> Box<dyn Collector> {
        self.aggregate.collector()
    }

    /// Apply one update.
    pub fn handle(&self, u: &MetricUpdate) -> Result<()> {
        let expected = self.spec.labels.len();
        if u.label_values.len() != expected {
            return Err(TallyError::LabelArity {
                name: u.name.clone(),
                expected,
                got: u.label_values.len(),
            });
        }
        let values: Vec<&str> = u.label_values.iter().map(String::as_str).collect();

        match &self.aggregate {
            Aggregate::Counter(c) => {
                if let Some(op) = self.counter_op(u)? {
                    apply_counter(c, op);
                }
            }
            Aggregate::CounterVec(v) => {
                if let Some(op) = self.counter_op(u)? {
                    apply_counter(&v.get_metric_with_label_values(&values).map_err(internal)?, op);
                }
            }
            Aggregate::Gauge(g) => {
                if let Some(op) = self.gauge_op(u) {
                    apply_gauge(g, op);
                }
            }
            Aggregate::GaugeVec(v) => {
                if let Some(op) = self.gauge_op(u) {
                    apply_gauge(&v.get_metric_with_label_values(&values).map_err(internal)?, op);
                }
            }
            Aggregate::Histogram(h) => {
                if self.is_observe(u) {
                    h.observe(u.value);
                }
            }
            Aggregate::HistogramVec(v) => {
                if self.is_observe(u) {
                    v.get_metric_with_label_values(&values)
                        .map_err(internal)?
                        .observe(u.value);
                }
            }
            Aggregate::Summary { child, .. } => {
                if self.is_observe(u) {
                    child.observe(u.value);
                }
            }
            Aggregate::SummaryVec(v) => {
                if self.is_observe(u) {
                    v.get_metric_with_label_values(&values)
                        .map_err(internal)?
                        .observe(u.value);
                }
            }
        }
        Ok(())
    }

    fn counter_op(&self, u: &MetricUpdate) -> Result<Option<CounterOp>> {
        match u.method.as_str() {
            "inc" => Ok(Some(CounterOp::Inc)),
            "add" => {
                if u.value.is_nan() || u.value < 0.0 {
                    return Err(TallyError::NegativeCounter {
                        name: u.name.clone(),
                        value: u.value,
                    });
                }
                Ok(Some(CounterOp::Add(u.value)))
            }
            _ => {
                self.ignore(u);
                Ok(None)
            }
        }
    }

    fn gauge_op(&self, u: &MetricUpdate) -> Option<GaugeOp> {
        match u.method.as_str() {
            "set" => Some(GaugeOp::Set(u.value)),
            "inc" => Some(GaugeOp::Inc),
            "dec" => Some(GaugeOp::Dec),
            "add" => Some(GaugeOp::Add(u.value)),
            "sub" => Some(GaugeOp::Sub(u.value)),
            "set_to_current_time" => Some(GaugeOp::SetToCurrentTime),
            _ => {
                self.ignore(u);
                None
            }
        }
    }

    fn is_observe(&self, u: &MetricUpdate) -> bool {
        if u.method == "observe" {
            return true;
        }
        self.ignore(u);
        false
    }

    fn ignore(&self, u: &MetricUpdate) {
        tracing::warn!(
            metric = %u.name,
            kind = %self.spec.kind,
            method = %u.method,
            "invalid method for metric, ignoring update"
        );
    }
}

fn apply_counter(c: &Counter, op: CounterOp) {
    match op {
        CounterOp::Inc => c.inc(),
        CounterOp::Add(v) => c.inc_by(v),
    }
}

fn apply_gauge(g: &Gauge, op: GaugeOp) {
    match op {
        GaugeOp::Set(v) => g.set(v),
        GaugeOp::Inc => g.inc(),
        GaugeOp::Dec => g.dec(),
        GaugeOp::Add(v) => g.add(v),
        GaugeOp::Sub(v) => g.sub(v),
        GaugeOp::SetToCurrentTime => g.set(unix_now()),
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// Arity is checked before any child lookup, so this only fires on a bug.
fn internal(e: prometheus::Error) -> TallyError {
    TallyError::Internal(format!("label lookup failed: {e}"))
}
