//! Metric streams
//!
//! This module provides:
//! - [`MetricRegistry`] - the run-scoped set of named metrics, shared by all virtual users
//! - [`MetricKind`] - counter, rate, trend or gauge
//! - [`Sample`] - a typed value appended to a metric
//! - [`RegistrySnapshot`] - a frozen copy used for thresholds and summaries
//!
//! A metric name is bound to its kind on first use. Later samples with a
//! different kind, of the wrong type for the kind (a number for a rate), or
//! NaN and infinite values fail with a [`MetricError`] which the run treats
//! as fatal.

mod registry;
mod sink;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use registry::{CheckTally, MetricRegistry, MetricSnapshot, RegistrySnapshot, Tags};
pub use sink::SinkSnapshot;

/// Built-in metric names
pub mod builtin {
    use super::MetricKind;

    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const DATA_RECEIVED: &str = "data_received";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const CHECKS: &str = "checks";
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";

    /// Every built-in metric with its kind, registered before a run starts
    pub const ALL: &[(&str, MetricKind)] = &[
        (HTTP_REQS, MetricKind::Counter),
        (HTTP_REQ_DURATION, MetricKind::Trend),
        (HTTP_REQ_FAILED, MetricKind::Rate),
        (DATA_RECEIVED, MetricKind::Counter),
        (ITERATIONS, MetricKind::Counter),
        (ITERATION_DURATION, MetricKind::Trend),
        (CHECKS, MetricKind::Rate),
        (VUS, MetricKind::Gauge),
        (VUS_MAX, MetricKind::Gauge),
    ];
}

/// Kind of a metric stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum
    Counter,
    /// Fraction of true samples
    Rate,
    /// Distribution supporting percentile queries
    Trend,
    /// Last observed value
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
            MetricKind::Gauge => "gauge",
        }
    }

    /// Whether a sample has the right type for this kind
    pub fn accepts(&self, sample: &Sample) -> bool {
        matches!(
            (self, sample),
            (MetricKind::Rate, Sample::Bool(_))
                | (MetricKind::Counter, Sample::Value(_))
                | (MetricKind::Trend, Sample::Value(_))
                | (MetricKind::Gauge, Sample::Value(_))
        )
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single value appended to a metric
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Value(f64),
    Bool(bool),
}

impl Sample {
    /// Kind a sample of this type would create
    pub fn implied_kind(&self) -> MetricKind {
        match self {
            Sample::Value(_) => MetricKind::Trend,
            Sample::Bool(_) => MetricKind::Rate,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            Sample::Value(v) => v.is_finite(),
            Sample::Bool(_) => true,
        }
    }
}

impl From<f64> for Sample {
    fn from(value: f64) -> Self {
        Sample::Value(value)
    }
}

impl From<u64> for Sample {
    fn from(value: u64) -> Self {
        Sample::Value(value as f64)
    }
}

impl From<bool> for Sample {
    fn from(value: bool) -> Self {
        Sample::Bool(value)
    }
}

/// Durations are recorded in milliseconds
impl From<Duration> for Sample {
    fn from(value: Duration) -> Self {
        Sample::Value(value.as_nanos() as f64 / 1_000_000.0)
    }
}

/// Metric integrity errors; any of these halts the run
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MetricError {
    /// The name is already bound to a different kind, or the sample's type
    /// belongs to another kind
    #[error("metric '{name}' is a {registered}, cannot record it as a {requested}")]
    TypeMismatch {
        name: String,
        registered: MetricKind,
        requested: MetricKind,
    },

    /// NaN or infinite value
    #[error("metric '{name}' is a {kind} and does not accept {sample} samples")]
    InvalidSample {
        name: String,
        kind: MetricKind,
        sample: &'static str,
    },

    /// Empty name or one using submetric syntax
    #[error("invalid metric name '{0}'")]
    InvalidName(String),
}
