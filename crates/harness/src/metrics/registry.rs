//! Run-scoped metric registry
//!
//! Owned by a run and shared with its virtual users through an `Arc`.
//! The map of metrics is concurrent; each metric serializes its own appends
//! behind a mutex, so concurrent workers never lose updates.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::builtin;
use super::sink::{Sink, SinkSnapshot};
use super::{MetricError, MetricKind, Sample};
use crate::config::ConfigError;

/// Sample tags; ordered so submetric names are deterministic
pub type Tags = BTreeMap<String, String>;

#[derive(Debug)]
struct Metric {
    kind: MetricKind,
    sink: Mutex<Sink>,
}

impl Metric {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            sink: Mutex::new(Sink::new(kind)),
        }
    }
}

/// A metric restricted to samples carrying all of `filter`'s tags
#[derive(Debug)]
struct Submetric {
    name: String,
    filter: Tags,
    sink: Mutex<Sink>,
}

impl Submetric {
    fn matches(&self, tags: &Tags) -> bool {
        self.filter
            .iter()
            .all(|(k, v)| tags.get(k).is_some_and(|t| t == v))
    }
}

#[derive(Debug, Default)]
struct CheckCounter {
    passes: AtomicU64,
    fails: AtomicU64,
}

/// Pass/fail totals for one named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

/// Registry of all metrics recorded during one run
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: DashMap<String, Arc<Metric>>,
    /// Parent metric name → submetrics filtering it
    submetrics: DashMap<String, Vec<Arc<Submetric>>>,
    checks: DashMap<String, Arc<CheckCounter>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in metric declared
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for (name, kind) in builtin::ALL {
            // Fresh registry, no conflicts possible
            let _ = registry.declare(name, *kind);
        }
        registry
    }

    /// Bind `name` to `kind` without recording a sample
    pub fn declare(&self, name: &str, kind: MetricKind) -> Result<(), MetricError> {
        self.get_or_create(name, kind).map(|_| ())
    }

    /// Kind a name is bound to, if any
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.metrics.get(name).map(|m| m.kind)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Append an untagged sample
    pub fn record(
        &self,
        name: &str,
        kind: MetricKind,
        sample: impl Into<Sample>,
    ) -> Result<(), MetricError> {
        self.record_tagged(name, kind, sample, &Tags::new())
    }

    /// Append a sample, creating the metric with `kind` on first use
    pub fn record_tagged(
        &self,
        name: &str,
        kind: MetricKind,
        sample: impl Into<Sample>,
        tags: &Tags,
    ) -> Result<(), MetricError> {
        let sample = sample.into();
        let metric = self.get_or_create(name, kind)?;

        metric.sink.lock().add(name, sample)?;

        if let Some(subs) = self.submetrics.get(name) {
            for sub in subs.iter().filter(|s| s.matches(tags)) {
                sub.sink.lock().add(&sub.name, sample)?;
            }
        }

        Ok(())
    }

    /// Count one check evaluation in the per-check breakdown
    pub fn record_check(&self, name: &str, passed: bool) {
        let counter = self
            .checks
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();

        if passed {
            counter.passes.fetch_add(1, Ordering::Relaxed);
        } else {
            counter.fails.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Register a submetric such as `http_req_duration{host:foo.localhost}`
    ///
    /// The parent metric must already exist; the submetric inherits its kind.
    /// Registering the same name twice is a no-op.
    pub fn add_submetric(&self, full_name: &str) -> Result<MetricKind, ConfigError> {
        let (parent, filter) = parse_metric_name(full_name)?;
        let kind = self
            .kind_of(&parent)
            .ok_or_else(|| ConfigError::UnknownMetric(parent.clone()))?;

        if filter.is_empty() {
            return Ok(kind);
        }

        let mut subs = self.submetrics.entry(parent).or_default();
        if !subs.iter().any(|s| s.name == full_name) {
            debug!(submetric = %full_name, "Registered submetric");
            subs.push(Arc::new(Submetric {
                name: full_name.to_string(),
                filter,
                sink: Mutex::new(Sink::new(kind)),
            }));
        }

        Ok(kind)
    }

    /// Freeze every metric, submetric and check tally
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut metrics = BTreeMap::new();

        for entry in self.metrics.iter() {
            metrics.insert(entry.key().clone(), freeze(&entry.sink));
        }

        for entry in self.submetrics.iter() {
            for sub in entry.value() {
                metrics.insert(sub.name.clone(), freeze(&sub.sink));
            }
        }

        let checks = self
            .checks
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    CheckTally {
                        passes: entry.passes.load(Ordering::Relaxed),
                        fails: entry.fails.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        RegistrySnapshot { metrics, checks }
    }

    /// Freeze only the named metrics and submetrics; check tallies are left out
    pub fn snapshot_of<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> RegistrySnapshot {
        let mut metrics = BTreeMap::new();

        for name in names {
            if metrics.contains_key(name) {
                continue;
            }
            let frozen = match name.find('{') {
                None => self.metrics.get(name).map(|m| freeze(&m.sink)),
                Some(open) => self.submetrics.get(&name[..open]).and_then(|subs| {
                    subs.iter()
                        .find(|s| s.name == name)
                        .map(|s| freeze(&s.sink))
                }),
            };
            if let Some(frozen) = frozen {
                metrics.insert(name.to_string(), frozen);
            }
        }

        RegistrySnapshot {
            metrics,
            checks: BTreeMap::new(),
        }
    }

    fn get_or_create(&self, name: &str, kind: MetricKind) -> Result<Arc<Metric>, MetricError> {
        if name.is_empty() || name.contains('{') {
            return Err(MetricError::InvalidName(name.to_string()));
        }

        // Fast path: no write lock on the shard once the metric exists
        let metric = match self.metrics.get(name) {
            Some(existing) => existing.value().clone(),
            None => self
                .metrics
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Metric::new(kind)))
                .value()
                .clone(),
        };

        if metric.kind != kind {
            return Err(MetricError::TypeMismatch {
                name: name.to_string(),
                registered: metric.kind,
                requested: kind,
            });
        }

        Ok(metric)
    }
}

/// Frozen aggregate of one metric or submetric
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub kind: MetricKind,
    pub sink: SinkSnapshot,
}

/// Frozen copy of a whole registry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    pub metrics: BTreeMap<String, MetricSnapshot>,
    pub checks: BTreeMap<String, CheckTally>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSnapshot> {
        self.metrics.get(name)
    }
}

/// Copy the sink under its lock and aggregate after releasing it, so
/// recording workers never wait on a sort
fn freeze(sink: &Mutex<Sink>) -> MetricSnapshot {
    let raw = sink.lock().clone();
    let sink = raw.into_snapshot();
    MetricSnapshot {
        kind: sink.kind(),
        sink,
    }
}

/// Split `name{tag:value,...}` into the parent name and its tag filter
pub(crate) fn parse_metric_name(full: &str) -> Result<(String, Tags), ConfigError> {
    let full = full.trim();
    let Some(open) = full.find('{') else {
        return Ok((full.to_string(), Tags::new()));
    };

    let invalid = || ConfigError::InvalidMetricName(full.to_string());

    if !full.ends_with('}') {
        return Err(invalid());
    }

    let parent = full[..open].trim();
    if parent.is_empty() {
        return Err(invalid());
    }

    let mut filter = Tags::new();
    for pair in full[open + 1..full.len() - 1].split(',') {
        let (key, value) = pair.split_once(':').ok_or_else(invalid)?;
        let key = key.trim();
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        if key.is_empty() {
            return Err(invalid());
        }
        filter.insert(key.to_string(), value.to_string());
    }

    Ok((parent.to_string(), filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_creates_on_first_use() {
        let registry = MetricRegistry::new();
        registry.record("hits", MetricKind::Counter, 1.0).unwrap();
        registry.record("hits", MetricKind::Counter, 2.0).unwrap();

        let snap = registry.snapshot();
        assert_eq!(snap.get("hits").unwrap().sink.sum(), Some(3.0));
    }

    #[test]
    fn test_kind_conflict_is_type_mismatch() {
        let registry = MetricRegistry::new();
        registry.declare("errors", MetricKind::Rate).unwrap();

        let err = registry
            .record("errors", MetricKind::Counter, 1.0)
            .unwrap_err();
        assert!(matches!(
            err,
            MetricError::TypeMismatch {
                registered: MetricKind::Rate,
                requested: MetricKind::Counter,
                ..
            }
        ));
    }

    #[test]
    fn test_numeric_sample_into_rate_fails() {
        let registry = MetricRegistry::new();
        registry.declare("errors", MetricKind::Rate).unwrap();

        let err = registry.record("errors", MetricKind::Rate, 0.3).unwrap_err();
        assert_eq!(
            err,
            MetricError::TypeMismatch {
                name: "errors".to_string(),
                registered: MetricKind::Rate,
                requested: MetricKind::Trend,
            }
        );
    }

    #[test]
    fn test_nan_sample_rejected_and_not_recorded() {
        let registry = MetricRegistry::with_builtins();
        registry.add_submetric("http_req_duration{host:foo}").unwrap();
        let tags: Tags = [("host".to_string(), "foo".to_string())].into();

        let err = registry
            .record_tagged(builtin::HTTP_REQ_DURATION, MetricKind::Trend, f64::NAN, &tags)
            .unwrap_err();
        assert!(matches!(err, MetricError::InvalidSample { sample: "non-finite", .. }));

        let snap = registry.snapshot();
        assert!(snap.get(builtin::HTTP_REQ_DURATION).unwrap().sink.is_empty());
        assert!(snap.get("http_req_duration{host:foo}").unwrap().sink.is_empty());
    }

    #[test]
    fn test_snapshot_of_selected_metrics() {
        let registry = MetricRegistry::with_builtins();
        registry.add_submetric("http_req_duration{host:foo}").unwrap();
        let tags: Tags = [("host".to_string(), "foo".to_string())].into();
        for v in [30.0, 10.0, 20.0] {
            registry
                .record_tagged(builtin::HTTP_REQ_DURATION, MetricKind::Trend, v, &tags)
                .unwrap();
        }
        registry.record(builtin::HTTP_REQS, MetricKind::Counter, 3u64).unwrap();
        registry.record_check("status is 200", true);

        let snap = registry.snapshot_of([
            "http_req_duration{host:foo}",
            builtin::HTTP_REQ_DURATION,
            "unknown",
            "http_req_duration{host:bar}",
        ]);

        assert_eq!(
            snap.metrics.keys().collect::<Vec<_>>(),
            vec!["http_req_duration", "http_req_duration{host:foo}"]
        );
        assert!(snap.checks.is_empty());

        let full = registry.snapshot();
        assert_eq!(
            snap.get("http_req_duration{host:foo}"),
            full.get("http_req_duration{host:foo}")
        );
        assert_eq!(
            snap.get(builtin::HTTP_REQ_DURATION).unwrap().sink.min(),
            Some(10.0)
        );
    }

    #[test]
    fn test_builtins_declared() {
        let registry = MetricRegistry::with_builtins();
        assert_eq!(
            registry.kind_of(builtin::HTTP_REQ_DURATION),
            Some(MetricKind::Trend)
        );
        assert_eq!(registry.kind_of(builtin::CHECKS), Some(MetricKind::Rate));
        assert!(registry.snapshot().get(builtin::HTTP_REQS).unwrap().sink.is_empty());
    }

    #[test]
    fn test_rejects_bad_names() {
        let registry = MetricRegistry::new();
        assert!(matches!(
            registry.record("", MetricKind::Counter, 1.0),
            Err(MetricError::InvalidName(_))
        ));
        assert!(matches!(
            registry.record("a{b:c}", MetricKind::Counter, 1.0),
            Err(MetricError::InvalidName(_))
        ));
    }

    #[test]
    fn test_submetric_filters_by_tags() {
        let registry = MetricRegistry::with_builtins();
        let kind = registry
            .add_submetric("http_req_duration{host:foo.localhost}")
            .unwrap();
        assert_eq!(kind, MetricKind::Trend);

        let foo = tags(&[("host", "foo.localhost"), ("status", "200")]);
        let bar = tags(&[("host", "bar.localhost"), ("status", "200")]);
        registry
            .record_tagged(builtin::HTTP_REQ_DURATION, MetricKind::Trend, 10.0, &foo)
            .unwrap();
        registry
            .record_tagged(builtin::HTTP_REQ_DURATION, MetricKind::Trend, 90.0, &bar)
            .unwrap();

        let snap = registry.snapshot();
        let sub = snap.get("http_req_duration{host:foo.localhost}").unwrap();
        assert_eq!(sub.sink.sample_count(), 1);
        assert_eq!(sub.sink.max(), Some(10.0));
        assert_eq!(
            snap.get(builtin::HTTP_REQ_DURATION).unwrap().sink.sample_count(),
            2
        );
    }

    #[test]
    fn test_submetric_requires_known_parent() {
        let registry = MetricRegistry::new();
        assert!(matches!(
            registry.add_submetric("nope{a:b}"),
            Err(ConfigError::UnknownMetric(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_parse_metric_name() {
        let (parent, filter) = parse_metric_name("errors").unwrap();
        assert_eq!(parent, "errors");
        assert!(filter.is_empty());

        let (parent, filter) =
            parse_metric_name("http_req_duration{host: \"bar.localhost\", status:200}").unwrap();
        assert_eq!(parent, "http_req_duration");
        assert_eq!(
            filter,
            tags(&[("host", "bar.localhost"), ("status", "200")])
        );

        assert!(parse_metric_name("x{a}").is_err());
        assert!(parse_metric_name("{a:b}").is_err());
        assert!(parse_metric_name("x{a:b").is_err());
    }

    #[test]
    fn test_check_tallies() {
        let registry = MetricRegistry::new();
        registry.record_check("status is 200", true);
        registry.record_check("status is 200", false);
        registry.record_check("status is 200", true);

        let snap = registry.snapshot();
        assert_eq!(
            snap.checks["status is 200"],
            CheckTally { passes: 2, fails: 1 }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_counter_appends_are_not_lost() {
        let registry = Arc::new(MetricRegistry::new());
        let mut handles = Vec::new();

        for worker in 0..8u64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                for i in 0..1000u64 {
                    registry
                        .record("total", MetricKind::Counter, (worker * 1000 + i) as f64)
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: u64 = (0..8000).sum();
        let snap = registry.snapshot();
        assert_eq!(snap.get("total").unwrap().sink.sum(), Some(expected as f64));
    }

    proptest! {
        #[test]
        fn prop_counter_sum_independent_of_interleaving(
            batches in prop::collection::vec(prop::collection::vec(0u32..10_000, 0..200), 1..6)
        ) {
            let registry = Arc::new(MetricRegistry::new());
            registry.declare("sum", MetricKind::Counter).unwrap();

            std::thread::scope(|scope| {
                for batch in &batches {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || {
                        for v in batch {
                            registry.record("sum", MetricKind::Counter, *v as f64).unwrap();
                        }
                    });
                }
            });

            let expected: u64 = batches.iter().flatten().map(|v| *v as u64).sum();
            let snap = registry.snapshot();
            prop_assert_eq!(snap.get("sum").unwrap().sink.sum(), Some(expected as f64));
        }
    }
}
