//! End-of-run summary
//!
//! Built once from the final registry snapshot and the threshold verdicts.
//! Everything is keyed by `BTreeMap`, so the JSON form has a stable order
//! and parses back into an identical value.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metrics::{CheckTally, MetricKind, RegistrySnapshot, SinkSnapshot};
use crate::threshold::{Statistic, ThresholdOutcome, ThresholdResults, ThresholdSet, Verdict};

/// Percentiles always reported for trends
const TREND_PERCENTILES: [f64; 3] = [90.0, 95.0, 99.0];

/// Aggregates and verdicts of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub kind: MetricKind,
    /// Statistic name (`avg`, `p(95)`, `rate`, ...) → value
    pub values: BTreeMap<String, f64>,
    /// Expression → outcome
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, ThresholdOutcome>,
}

impl MetricSummary {
    pub fn value(&self, stat: &str) -> Option<f64> {
        self.values.get(stat).copied()
    }
}

/// Run identity and timing
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub run_id: Uuid,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub aborted: Option<String>,
}

impl RunInfo {
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            scenario: scenario.into(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            aborted: None,
        }
    }
}

/// Immutable result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: Uuid,
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Why the run stopped before its schedule ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub vus_max: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: BTreeMap<String, CheckTally>,
}

impl Summary {
    /// Assemble the summary from the final snapshot
    pub fn build(
        info: RunInfo,
        snapshot: &RegistrySnapshot,
        thresholds: &ThresholdSet,
        results: ThresholdResults,
    ) -> Self {
        let mut metrics: BTreeMap<String, MetricSummary> = snapshot
            .metrics
            .iter()
            .map(|(name, metric)| {
                (
                    name.clone(),
                    MetricSummary {
                        kind: metric.kind,
                        values: aggregate(&metric.sink, info.duration),
                        thresholds: BTreeMap::new(),
                    },
                )
            })
            .collect();

        // Percentiles a threshold asks for are reported even when unusual
        for threshold in thresholds.iter() {
            if let (Statistic::Percentile(p), Some(metric), Some(summary)) = (
                threshold.expr.statistic,
                snapshot.get(&threshold.metric),
                metrics.get_mut(&threshold.metric),
            ) {
                if let Some(v) = metric.sink.percentile(p) {
                    summary.values.insert(threshold.expr.statistic.to_string(), v);
                }
            }
        }

        for (metric, outcomes) in results {
            if let Some(summary) = metrics.get_mut(&metric) {
                summary.thresholds = outcomes;
            }
        }

        let vus_max = snapshot
            .get(crate::metrics::builtin::VUS_MAX)
            .and_then(|m| m.sink.max())
            .unwrap_or(0.0) as u64;

        Self {
            run_id: info.run_id,
            scenario: info.scenario,
            started_at: info.started_at,
            duration: info.duration,
            aborted: info.aborted,
            vus_max,
            metrics,
            checks: snapshot.checks.clone(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    /// `metrics[name].values[stat]`
    pub fn value(&self, name: &str, stat: &str) -> Option<f64> {
        self.metric(name).and_then(|m| m.value(stat))
    }

    /// Every threshold outcome as `(metric, expression, outcome)`
    pub fn threshold_outcomes(&self) -> impl Iterator<Item = (&str, &str, &ThresholdOutcome)> {
        self.metrics.iter().flat_map(|(name, metric)| {
            metric
                .thresholds
                .iter()
                .map(move |(expr, outcome)| (name.as_str(), expr.as_str(), outcome))
        })
    }

    /// No threshold failed; `no_data` counts as passing
    pub fn thresholds_passed(&self) -> bool {
        self.threshold_outcomes()
            .all(|(_, _, outcome)| outcome.verdict != Verdict::Fail)
    }

    /// `metric: expression` of every failed threshold
    pub fn failed_thresholds(&self) -> Vec<String> {
        self.threshold_outcomes()
            .filter(|(_, _, outcome)| outcome.is_failed())
            .map(|(name, expr, _)| format!("{}: {}", name, expr))
            .collect()
    }
}

fn aggregate(sink: &SinkSnapshot, elapsed: Duration) -> BTreeMap<String, f64> {
    let mut values = BTreeMap::new();
    let mut put = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            values.insert(key.to_string(), v);
        }
    };

    match sink {
        SinkSnapshot::Counter { sum, .. } => {
            put("count", Some(*sum));
            put("rate", sink.per_second(elapsed.as_secs_f64()));
        }
        SinkSnapshot::Rate { trues, total } => {
            put("rate", sink.rate());
            put("passes", Some(*trues as f64));
            put("fails", Some((total - trues) as f64));
        }
        SinkSnapshot::Trend { .. } => {
            put("avg", sink.avg());
            put("min", sink.min());
            put("med", sink.percentile(50.0));
            put("max", sink.max());
            for p in TREND_PERCENTILES {
                put(&Statistic::Percentile(p).to_string(), sink.percentile(p));
            }
        }
        SinkSnapshot::Gauge { .. } => {
            put("value", sink.value());
            put("min", sink.min());
            put("max", sink.max());
        }
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdList;
    use crate::metrics::{builtin, MetricRegistry};

    fn sample_summary() -> Summary {
        let registry = MetricRegistry::with_builtins();
        for ms in [100.0, 100.0, 100.0, 300.0] {
            registry
                .record(builtin::HTTP_REQ_DURATION, MetricKind::Trend, ms)
                .unwrap();
            registry
                .record(builtin::HTTP_REQS, MetricKind::Counter, 1.0)
                .unwrap();
        }
        registry
            .record(builtin::HTTP_REQ_FAILED, MetricKind::Rate, false)
            .unwrap();
        registry.record(builtin::VUS_MAX, MetricKind::Gauge, 20.0).unwrap();
        registry.record_check("status is 200", true);

        let mut specs = BTreeMap::new();
        specs.insert(
            builtin::HTTP_REQ_DURATION.to_string(),
            ["p(95)<500", "p(99.9)<250"].into_iter().collect::<ThresholdList>(),
        );
        let set = ThresholdSet::compile(&specs, &registry).unwrap();

        let snapshot = registry.snapshot();
        let mut info = RunInfo::new("host-routing");
        info.duration = Duration::from_secs(2);
        let results = set.evaluate(&snapshot, info.duration);
        Summary::build(info, &snapshot, &set, results)
    }

    #[test]
    fn test_build_aggregates() {
        let summary = sample_summary();

        assert_eq!(summary.vus_max, 20);
        assert_eq!(summary.value(builtin::HTTP_REQS, "count"), Some(4.0));
        assert_eq!(summary.value(builtin::HTTP_REQS, "rate"), Some(2.0));
        assert_eq!(summary.value(builtin::HTTP_REQ_DURATION, "avg"), Some(150.0));
        assert_eq!(summary.value(builtin::HTTP_REQ_DURATION, "med"), Some(100.0));
        assert!(summary.value(builtin::HTTP_REQ_DURATION, "p(99.9)").is_some());
        assert_eq!(summary.value(builtin::HTTP_REQ_FAILED, "fails"), Some(1.0));
        assert_eq!(summary.checks["status is 200"].passes, 1);

        // no samples: no values at all
        assert!(summary.metric(builtin::ITERATION_DURATION).unwrap().values.is_empty());
    }

    #[test]
    fn test_threshold_verdicts_attached() {
        let summary = sample_summary();

        let outcomes = &summary.metric(builtin::HTTP_REQ_DURATION).unwrap().thresholds;
        assert_eq!(outcomes["p(95)<500"].verdict, Verdict::Pass);
        assert_eq!(outcomes["p(99.9)<250"].verdict, Verdict::Fail);
        assert!(!summary.thresholds_passed());
        assert_eq!(
            summary.failed_thresholds(),
            vec!["http_req_duration: p(99.9)<250".to_string()]
        );
    }

    #[test]
    fn test_json_round_trip() {
        let summary = sample_summary();
        let json = serde_json::to_string(&summary).unwrap();
        let back: Summary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
