//! Summary collector.
//!
//! The `prometheus` crate ships counters, gauges and histograms but no
//! summaries, so this module provides one behind the same `Collector`
//! interface. Each label tuple keeps a sliding window of recent observations
//! (bounded by age and by count) plus lifetime count and sum. Quantiles are
//! computed exactly over the window at scrape time, which stays within any
//! configured error tolerance.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};

/// Observations older than this leave the quantile window.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(600);

/// Upper bound on retained observations per label tuple.
pub const MAX_WINDOW_SAMPLES: usize = 4096;

struct Window {
    samples: VecDeque<(Instant, f64)>,
    count: u64,
    sum: f64,
}

impl Window {
    fn expire(&mut self, now: Instant, max_age: Duration) {
        while let Some(&(at, _)) = self.samples.front() {
            if now.duration_since(at) <= max_age {
                break;
            }
            self.samples.pop_front();
        }
    }
}

struct SummaryCore {
    objectives: Arc<[(f64, f64)]>,
    max_age: Duration,
    window: Mutex<Window>,
}

/// One summary child (a scalar summary, or one label tuple of a vector).
#[derive(Clone)]
pub struct Summary {
    core: Arc<SummaryCore>,
}

impl Summary {
    fn new(objectives: Arc<[(f64, f64)]>, max_age: Duration) -> Self {
        Self {
            core: Arc::new(SummaryCore {
                objectives,
                max_age,
                window: Mutex::new(Window {
                    samples: VecDeque::new(),
                    count: 0,
                    sum: 0.0,
                }),
            }),
        }
    }

    pub fn observe(&self, v: f64) {
        let now = Instant::now();
        // A poisoned window only means another observer panicked mid-push;
        // the data is still usable.
        let mut w = self.core.window.lock().unwrap_or_else(PoisonError::into_inner);
        w.count += 1;
        w.sum += v;
        w.samples.push_back((now, v));
        if w.samples.len() > MAX_WINDOW_SAMPLES {
            w.samples.pop_front();
        }
        w.expire(now, self.core.max_age);
    }

    pub fn get_sample_count(&self) -> u64 {
        self.core.window.lock().unwrap_or_else(PoisonError::into_inner).count
    }

    pub fn get_sample_sum(&self) -> f64 {
        self.core.window.lock().unwrap_or_else(PoisonError::into_inner).sum
    }

    /// `(quantile, value)` per objective; `NaN` values while the window is empty.
    pub fn quantiles(&self) -> Vec<(f64, f64)> {
        let mut sorted: Vec<f64> = {
            let mut w = self.core.window.lock().unwrap_or_else(PoisonError::into_inner);
            w.expire(Instant::now(), self.core.max_age);
            w.samples.iter().map(|&(_, v)| v).collect()
        };
        sorted.sort_by(f64::total_cmp);

        self.core
            .objectives
            .iter()
            .map(|&(q, _)| (q, nearest_rank(&sorted, q)))
            .collect()
    }

    fn to_proto(&self) -> proto::Summary {
        let quantiles = self.quantiles();
        let (count, sum) = {
            let w = self.core.window.lock().unwrap_or_else(PoisonError::into_inner);
            (w.count, w.sum)
        };

        let mut out = proto::Summary::default();
        out.set_sample_count(count);
        out.set_sample_sum(sum);
        for (q, v) in quantiles {
            let mut quantile = proto::Quantile::default();
            quantile.set_quantile(q);
            quantile.set_value(v);
            out.mut_quantile().push(quantile);
        }
        out
    }
}

fn nearest_rank(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

struct SummaryVecCore {
    desc: Desc,
    objectives: Arc<[(f64, f64)]>,
    max_age: Duration,
    children: DashMap<Vec<String>, Summary>,
}

/// Summary family keyed by label-value tuples. With no labels it holds a
/// single child under the empty tuple.
#[derive(Clone)]
pub struct SummaryVec {
    inner: Arc<SummaryVecCore>,
}

impl SummaryVec {
    pub fn new(
        name: &str,
        help: &str,
        labels: &[&str],
        objectives: Vec<(f64, f64)>,
    ) -> prometheus::Result<Self> {
        let desc = Desc::new(
            name.to_string(),
            help.to_string(),
            labels.iter().map(|l| l.to_string()).collect(),
            HashMap::new(),
        )?;
        Ok(Self {
            inner: Arc::new(SummaryVecCore {
                desc,
                objectives: objectives.into(),
                max_age: DEFAULT_MAX_AGE,
                children: DashMap::new(),
            }),
        })
    }

    /// Resolve the child for `values`, creating it on first use.
    pub fn get_metric_with_label_values(&self, values: &[&str]) -> prometheus::Result<Summary> {
        let expect = self.inner.desc.variable_labels.len();
        if values.len() != expect {
            return Err(prometheus::Error::InconsistentCardinality {
                expect,
                got: values.len(),
            });
        }

        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        if let Some(child) = self.inner.children.get(&key) {
            return Ok(child.value().clone());
        }
        let child = self
            .inner
            .children
            .entry(key)
            .or_insert_with(|| {
                Summary::new(Arc::clone(&self.inner.objectives), self.inner.max_age)
            });
        Ok(child.value().clone())
    }
}

impl Collector for SummaryVec {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let desc = &self.inner.desc;

        let mut family = MetricFamily::default();
        family.set_name(desc.fq_name.clone());
        family.set_help(desc.help.clone());
        family.set_field_type(MetricType::SUMMARY);

        for child in self.inner.children.iter() {
            let mut pairs: Vec<(&String, &String)> =
                desc.variable_labels.iter().zip(child.key().iter()).collect();
            pairs.sort();

            let mut metric = proto::Metric::default();
            for (name, value) in pairs {
                let mut pair = proto::LabelPair::default();
                pair.set_name(name.clone());
                pair.set_value(value.clone());
                metric.mut_label().push(pair);
            }
            metric.set_summary(child.value().to_proto());
            family.mut_metric().push(metric);
        }

        vec![family]
    }
}
