//! Per-kind aggregation
//!
//! Each metric owns one [`Sink`] behind its own mutex. Aggregates are sums,
//! counts and min/max, so the result does not depend on the order in which
//! workers append. Trend samples are kept raw and sorted only when a
//! snapshot is taken.

use serde::Serialize;

use super::{MetricError, MetricKind, Sample};

#[derive(Debug, Clone)]
pub(crate) enum Sink {
    Counter(CounterSink),
    Rate(RateSink),
    Trend(TrendSink),
    Gauge(GaugeSink),
}

impl Sink {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Sink::Counter(CounterSink::default()),
            MetricKind::Rate => Sink::Rate(RateSink::default()),
            MetricKind::Trend => Sink::Trend(TrendSink::default()),
            MetricKind::Gauge => Sink::Gauge(GaugeSink::default()),
        }
    }

    pub(crate) fn kind(&self) -> MetricKind {
        match self {
            Sink::Counter(_) => MetricKind::Counter,
            Sink::Rate(_) => MetricKind::Rate,
            Sink::Trend(_) => MetricKind::Trend,
            Sink::Gauge(_) => MetricKind::Gauge,
        }
    }

    pub(crate) fn add(&mut self, name: &str, sample: Sample) -> Result<(), MetricError> {
        if !sample.is_finite() {
            return Err(MetricError::InvalidSample {
                name: name.to_string(),
                kind: self.kind(),
                sample: "non-finite",
            });
        }

        match (self, sample) {
            (Sink::Counter(sink), Sample::Value(v)) => sink.add(v),
            (Sink::Rate(sink), Sample::Bool(b)) => sink.add(b),
            (Sink::Trend(sink), Sample::Value(v)) => sink.add(v),
            (Sink::Gauge(sink), Sample::Value(v)) => sink.set(v),
            (sink, sample) => {
                return Err(MetricError::TypeMismatch {
                    name: name.to_string(),
                    registered: sink.kind(),
                    requested: sample.implied_kind(),
                })
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> SinkSnapshot {
        self.clone().into_snapshot()
    }

    /// Freeze the sink; trend samples are sorted in place
    pub(crate) fn into_snapshot(self) -> SinkSnapshot {
        match self {
            Sink::Counter(sink) => SinkSnapshot::Counter {
                sum: sink.sum,
                samples: sink.samples,
            },
            Sink::Rate(sink) => SinkSnapshot::Rate {
                trues: sink.trues,
                total: sink.total,
            },
            Sink::Trend(sink) => {
                let mut sorted = sink.samples;
                sorted.sort_by(f64::total_cmp);
                SinkSnapshot::Trend {
                    sorted,
                    sum: sink.sum,
                }
            }
            Sink::Gauge(sink) => SinkSnapshot::Gauge {
                value: sink.value,
                min: sink.min,
                max: sink.max,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CounterSink {
    sum: f64,
    samples: u64,
}

impl CounterSink {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.samples += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RateSink {
    trues: u64,
    total: u64,
}

impl RateSink {
    fn add(&mut self, value: bool) {
        if value {
            self.trues += 1;
        }
        self.total += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct TrendSink {
    samples: Vec<f64>,
    sum: f64,
}

impl TrendSink {
    fn add(&mut self, value: f64) {
        self.samples.push(value);
        self.sum += value;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GaugeSink {
    value: Option<f64>,
    min: Option<f64>,
    max: Option<f64>,
}

impl GaugeSink {
    fn set(&mut self, value: f64) {
        self.value = Some(value);
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }
}

/// Frozen aggregate of one metric
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkSnapshot {
    Counter { sum: f64, samples: u64 },
    Rate { trues: u64, total: u64 },
    Trend { sorted: Vec<f64>, sum: f64 },
    Gauge {
        value: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl SinkSnapshot {
    pub fn kind(&self) -> MetricKind {
        match self {
            SinkSnapshot::Counter { .. } => MetricKind::Counter,
            SinkSnapshot::Rate { .. } => MetricKind::Rate,
            SinkSnapshot::Trend { .. } => MetricKind::Trend,
            SinkSnapshot::Gauge { .. } => MetricKind::Gauge,
        }
    }

    /// Number of samples seen
    pub fn sample_count(&self) -> u64 {
        match self {
            SinkSnapshot::Counter { samples, .. } => *samples,
            SinkSnapshot::Rate { total, .. } => *total,
            SinkSnapshot::Trend { sorted, .. } => sorted.len() as u64,
            SinkSnapshot::Gauge { value, .. } => u64::from(value.is_some()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }

    /// Counter sum
    pub fn sum(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Counter { sum, .. } => Some(*sum),
            _ => None,
        }
    }

    /// Fraction of true samples for rates
    pub fn rate(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Rate { trues, total } if *total > 0 => {
                Some(*trues as f64 / *total as f64)
            }
            _ => None,
        }
    }

    /// Counter sum divided by the run duration
    pub fn per_second(&self, elapsed_secs: f64) -> Option<f64> {
        match self {
            SinkSnapshot::Counter { sum, .. } if elapsed_secs > 0.0 => Some(sum / elapsed_secs),
            SinkSnapshot::Counter { .. } => Some(0.0),
            _ => None,
        }
    }

    pub fn avg(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Trend { sorted, sum } if !sorted.is_empty() => {
                Some(sum / sorted.len() as f64)
            }
            _ => None,
        }
    }

    pub fn min(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Trend { sorted, .. } => sorted.first().copied(),
            SinkSnapshot::Gauge { min, .. } => *min,
            _ => None,
        }
    }

    pub fn max(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Trend { sorted, .. } => sorted.last().copied(),
            SinkSnapshot::Gauge { max, .. } => *max,
            _ => None,
        }
    }

    /// Last gauge value
    pub fn value(&self) -> Option<f64> {
        match self {
            SinkSnapshot::Gauge { value, .. } => *value,
            _ => None,
        }
    }

    /// Percentile in `[0, 100]`, interpolated between the closest ranks
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let SinkSnapshot::Trend { sorted, .. } = self else {
            return None;
        };
        if sorted.is_empty() {
            return None;
        }

        let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let weight = rank - lower as f64;

        Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
    }
}
