//! Threshold expressions and evaluation
//!
//! A threshold binds an expression such as `p(95) < 500` to a metric (or a
//! submetric like `http_req_duration{host:foo.localhost}`). Expressions are
//! parsed and checked against the metric's kind when the set is compiled, so
//! a typo fails the run before any virtual user starts.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{ConfigError, ThresholdList};
use crate::metrics::{MetricKind, MetricRegistry, RegistrySnapshot, SinkSnapshot};

static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([a-z]+(?:\(\s*[0-9.]+\s*\))?)\s*(<=|>=|==|!=|<|>)\s*(-?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*$")
        .unwrap_or_else(|e| unreachable!("threshold regex is valid: {e}"))
});

static PERCENTILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^p\(\s*([0-9]+(?:\.[0-9]+)?)\s*\)$")
        .unwrap_or_else(|e| unreachable!("percentile regex is valid: {e}"))
});

/// Aggregated statistic a threshold compares
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Avg,
    Min,
    Max,
    Med,
    /// Percentile in `[0, 100]`
    Percentile(f64),
    Rate,
    Count,
    Value,
}

impl Statistic {
    fn parse(raw: &str) -> Result<Self, String> {
        let stat = match raw {
            "avg" => Statistic::Avg,
            "min" => Statistic::Min,
            "max" => Statistic::Max,
            "med" => Statistic::Med,
            "rate" => Statistic::Rate,
            "count" => Statistic::Count,
            "value" => Statistic::Value,
            other => {
                let caps = PERCENTILE_RE
                    .captures(other)
                    .ok_or_else(|| format!("unknown statistic '{}'", other))?;
                let p: f64 = caps[1]
                    .parse()
                    .map_err(|_| format!("invalid percentile '{}'", &caps[1]))?;
                if !(0.0..=100.0).contains(&p) {
                    return Err(format!("percentile {} is outside 0..=100", p));
                }
                Statistic::Percentile(p)
            }
        };
        Ok(stat)
    }

    /// Whether this statistic is defined for a metric kind
    pub fn supports(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Trend => matches!(
                self,
                Statistic::Avg
                    | Statistic::Min
                    | Statistic::Max
                    | Statistic::Med
                    | Statistic::Percentile(_)
            ),
            MetricKind::Rate => matches!(self, Statistic::Rate),
            MetricKind::Counter => matches!(self, Statistic::Count | Statistic::Rate),
            MetricKind::Gauge => {
                matches!(self, Statistic::Value | Statistic::Min | Statistic::Max)
            }
        }
    }

    /// Observed value, `None` when the metric has no samples
    pub fn observe(&self, sink: &SinkSnapshot, elapsed: Duration) -> Option<f64> {
        if sink.is_empty() {
            return None;
        }
        match (self, sink.kind()) {
            (Statistic::Count, MetricKind::Counter) => sink.sum(),
            (Statistic::Rate, MetricKind::Counter) => sink.per_second(elapsed.as_secs_f64()),
            (Statistic::Rate, _) => sink.rate(),
            (Statistic::Avg, _) => sink.avg(),
            (Statistic::Min, _) => sink.min(),
            (Statistic::Max, _) => sink.max(),
            (Statistic::Med, _) => sink.percentile(50.0),
            (Statistic::Percentile(p), _) => sink.percentile(*p),
            (Statistic::Value, _) => sink.value(),
            (Statistic::Count, _) => None,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statistic::Avg => write!(f, "avg"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
            Statistic::Med => write!(f, "med"),
            Statistic::Percentile(p) => write!(f, "p({})", p),
            Statistic::Rate => write!(f, "rate"),
            Statistic::Count => write!(f, "count"),
            Statistic::Value => write!(f, "value"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "==" => Comparator::Eq,
            "!=" => Comparator::Ne,
            _ => return None,
        })
    }

    pub fn holds(&self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
            Comparator::Ne => observed != bound,
        }
    }
}

/// Parsed `<stat> <op> <number>`
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub bound: f64,
}

impl ThresholdExpr {
    /// Parse an expression; the error is a human readable reason
    pub fn parse(source: &str) -> Result<Self, String> {
        let caps = EXPR_RE
            .captures(source)
            .ok_or_else(|| "expected '<statistic> <operator> <number>'".to_string())?;

        let statistic = Statistic::parse(&caps[1])?;
        let comparator = Comparator::parse(&caps[2])
            .ok_or_else(|| format!("unknown operator '{}'", &caps[2]))?;
        let bound: f64 = caps[3]
            .parse()
            .map_err(|_| format!("invalid number '{}'", &caps[3]))?;

        Ok(Self {
            statistic,
            comparator,
            bound,
        })
    }
}

/// Result of evaluating one threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    /// The metric saw no samples
    NoData,
}

impl Verdict {
    /// Report marker
    pub fn marker(&self) -> &'static str {
        match self {
            Verdict::Pass => "✓",
            Verdict::Fail => "✗",
            Verdict::NoData => "–",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
            Verdict::NoData => write!(f, "no_data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOutcome {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,
}

impl ThresholdOutcome {
    pub fn is_failed(&self) -> bool {
        self.verdict == Verdict::Fail
    }
}

/// Metric name → expression → outcome
pub type ThresholdResults = BTreeMap<String, BTreeMap<String, ThresholdOutcome>>;

/// True when no threshold failed (`no_data` does not fail a run)
pub fn all_passed(results: &ThresholdResults) -> bool {
    results
        .values()
        .flat_map(|exprs| exprs.values())
        .all(|outcome| !outcome.is_failed())
}

/// One compiled threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    /// Expression as written in the configuration
    pub source: String,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl Threshold {
    pub fn evaluate(&self, snapshot: &RegistrySnapshot, elapsed: Duration) -> ThresholdOutcome {
        let observed = snapshot
            .get(&self.metric)
            .and_then(|m| self.expr.statistic.observe(&m.sink, elapsed));

        let verdict = match observed {
            None => Verdict::NoData,
            Some(v) if self.expr.comparator.holds(v, self.expr.bound) => Verdict::Pass,
            Some(_) => Verdict::Fail,
        };

        ThresholdOutcome { verdict, observed }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.metric, self.source)
    }
}

/// All thresholds of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdSet {
    thresholds: Vec<Threshold>,
}

impl ThresholdSet {
    /// Parse every expression and bind it to a registered metric
    ///
    /// Submetrics named by the configuration are created in `registry`, so
    /// all metrics the thresholds reference must be declared beforehand.
    pub fn compile(
        specs: &BTreeMap<String, ThresholdList>,
        registry: &MetricRegistry,
    ) -> Result<Self, ConfigError> {
        let mut thresholds = Vec::new();

        for (metric, list) in specs {
            let kind = registry.add_submetric(metric)?;

            for def in &list.0 {
                let expr = ThresholdExpr::parse(&def.threshold).map_err(|reason| {
                    ConfigError::InvalidThreshold {
                        metric: metric.clone(),
                        expression: def.threshold.clone(),
                        reason,
                    }
                })?;

                if !expr.statistic.supports(kind) {
                    return Err(ConfigError::UnsupportedStatistic {
                        metric: metric.clone(),
                        kind,
                        statistic: expr.statistic.to_string(),
                    });
                }

                thresholds.push(Threshold {
                    metric: metric.clone(),
                    source: def.threshold.clone(),
                    expr,
                    abort_on_fail: def.abort_on_fail,
                    delay_abort_eval: def.delay_abort_eval,
                });
            }
        }

        Ok(Self { thresholds })
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter()
    }

    pub fn has_abort_on_fail(&self) -> bool {
        self.thresholds.iter().any(|t| t.abort_on_fail)
    }

    /// Evaluate every threshold against a snapshot
    pub fn evaluate(&self, snapshot: &RegistrySnapshot, elapsed: Duration) -> ThresholdResults {
        let mut results = ThresholdResults::new();

        for threshold in &self.thresholds {
            let outcome = threshold.evaluate(snapshot, elapsed);
            if outcome.verdict == Verdict::NoData {
                warn!(
                    metric = %threshold.metric,
                    threshold = %threshold.source,
                    "Threshold metric has no samples"
                );
            }
            results
                .entry(threshold.metric.clone())
                .or_default()
                .insert(threshold.source.clone(), outcome);
        }

        results
    }

    /// Abort-on-fail thresholds past their evaluation delay
    fn armed(&self, elapsed: Duration) -> impl Iterator<Item = &Threshold> {
        self.thresholds
            .iter()
            .filter(move |t| t.abort_on_fail && elapsed >= t.delay_abort_eval)
    }

    /// Metrics the armed abort-on-fail thresholds read
    pub fn abort_metrics(&self, elapsed: Duration) -> impl Iterator<Item = &str> {
        self.armed(elapsed).map(|t| t.metric.as_str())
    }

    /// First abort-on-fail threshold that currently fails, once past its delay
    pub fn first_abort(&self, snapshot: &RegistrySnapshot, elapsed: Duration) -> Option<&Threshold> {
        self.armed(elapsed)
            .find(|t| t.evaluate(snapshot, elapsed).is_failed())
    }
}
