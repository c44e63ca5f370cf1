//! Run configuration
//!
//! Loaded from YAML with environment overrides (`SURGE_*`). Every field has a
//! default, so an empty document describes the stock host-routing test: a
//! 30s ramp to 10 users, one minute up to 20, 30s back down to zero.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricError, MetricKind};
use crate::stage::{Stage, StageSchedule};

/// Configuration errors; all of them surface before any virtual user starts
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid stages: {0}")]
    InvalidStages(String),

    #[error("invalid threshold '{expression}' on '{metric}': {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold references unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("statistic '{statistic}' is not available for {kind} metric '{metric}'")]
    UnsupportedStatistic {
        metric: String,
        kind: MetricKind,
        statistic: String,
    },

    #[error("invalid metric name '{0}'")]
    InvalidMetricName(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("metric declaration failed: {0}")]
    Metric(#[from] MetricError),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Uniform pause range between iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseRange {
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
}

impl Default for PauseRange {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(100),
            max: Duration::from_millis(500),
        }
    }
}

impl PauseRange {
    pub fn fixed(pause: Duration) -> Self {
        Self {
            min: pause,
            max: pause,
        }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Draw a pause uniformly from `[min, max]`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let nanos = rng.gen_range(self.min.as_nanos()..=self.max.as_nanos());
        Duration::from_nanos(nanos as u64)
    }
}

/// One threshold expression with its abort policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawThreshold")]
pub struct ThresholdDef {
    pub threshold: String,
    /// Stop the run as soon as a periodic evaluation fails
    pub abort_on_fail: bool,
    /// Skip periodic evaluation until this much of the run has elapsed
    #[serde(with = "humantime_serde")]
    pub delay_abort_eval: Duration,
}

impl ThresholdDef {
    pub fn new(threshold: impl Into<String>) -> Self {
        Self {
            threshold: threshold.into(),
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        }
    }

    pub fn abort_on_fail(mut self, delay: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay;
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawThreshold {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, alias = "abortOnFail")]
        abort_on_fail: bool,
        #[serde(default, alias = "delayAbortEval", with = "humantime_serde")]
        delay_abort_eval: Option<Duration>,
    },
}

impl From<RawThreshold> for ThresholdDef {
    fn from(raw: RawThreshold) -> Self {
        match raw {
            RawThreshold::Expr(threshold) => ThresholdDef::new(threshold),
            RawThreshold::Detailed {
                threshold,
                abort_on_fail,
                delay_abort_eval,
            } => ThresholdDef {
                threshold,
                abort_on_fail,
                delay_abort_eval: delay_abort_eval.unwrap_or_default(),
            },
        }
    }
}

/// Threshold expressions bound to one metric; YAML accepts one or a list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct ThresholdList(pub Vec<ThresholdDef>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<ThresholdDef>),
    One(ThresholdDef),
}

impl From<OneOrMany> for ThresholdList {
    fn from(raw: OneOrMany) -> Self {
        match raw {
            OneOrMany::Many(defs) => ThresholdList(defs),
            OneOrMany::One(def) => ThresholdList(vec![def]),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for ThresholdList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        ThresholdList(iter.into_iter().map(ThresholdDef::new).collect())
    }
}

/// Where reports go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print the text summary to stdout
    pub text: bool,
    /// Indent prefix for the text summary
    pub text_indent: String,
    /// ANSI colours in the text summary
    pub colors: bool,
    pub json: Option<PathBuf>,
    pub html: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            text: true,
            text_indent: " ".to_string(),
            colors: false,
            json: Some(PathBuf::from("load-test-summary.json")),
            html: Some(PathBuf::from("load-test-report.html")),
        }
    }
}

/// Everything a run needs besides the iteration logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub name: String,
    /// Request target; the `Host` header selects the backend
    pub base_url: String,
    /// Candidate `Host` header values, picked uniformly per iteration
    pub hosts: Vec<String>,
    /// Virtual users at elapsed time zero
    pub start_vus: u64,
    pub stages: Vec<Stage>,
    /// Metric name (optionally `name{tag:value}`) → threshold expressions
    pub thresholds: BTreeMap<String, ThresholdList>,
    pub pause: PauseRange,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long draining virtual users may take before they are cut off
    #[serde(with = "humantime_serde")]
    pub graceful_stop: Duration,
    /// Scheduler tick
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Period of abort-on-fail threshold evaluation
    #[serde(with = "humantime_serde")]
    pub threshold_interval: Duration,
    pub outputs: OutputConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        let thresholds = [
            ("http_req_duration", "p(95)<500"),
            ("http_req_failed", "rate<0.1"),
            ("errors", "rate<0.1"),
        ]
        .into_iter()
        .map(|(metric, expr)| (metric.to_string(), [expr].into_iter().collect()))
        .collect();

        Self {
            name: "host-routing".to_string(),
            base_url: "http://localhost/".to_string(),
            hosts: vec!["foo.localhost".to_string(), "bar.localhost".to_string()],
            start_vus: 0,
            stages: vec![
                Stage::new(Duration::from_secs(30), 10),
                Stage::new(Duration::from_secs(60), 20),
                Stage::new(Duration::from_secs(30), 0),
            ],
            thresholds,
            pause: PauseRange::default(),
            request_timeout: Duration::from_secs(60),
            graceful_stop: Duration::from_secs(30),
            tick_interval: Duration::from_millis(100),
            threshold_interval: Duration::from_secs(2),
            outputs: OutputConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validated stage schedule
    pub fn schedule(&self) -> Result<StageSchedule, ConfigError> {
        StageSchedule::with_start_target(self.start_vus, self.stages.clone())
    }

    /// Check everything that does not need a metric registry
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule()?;

        let url = url::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "base_url",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }

        if self.hosts.iter().any(|h| h.trim().is_empty()) {
            return Err(ConfigError::invalid("hosts", "host names must not be empty"));
        }
        if self.pause.min > self.pause.max {
            return Err(ConfigError::invalid("pause", "min is greater than max"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be positive"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::invalid("tick_interval", "must be positive"));
        }
        if self.threshold_interval.is_zero() {
            return Err(ConfigError::invalid("threshold_interval", "must be positive"));
        }

        Ok(())
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            prefix: "SURGE".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load a YAML file, then apply environment overrides and validate
    pub fn from_file(&self, path: impl AsRef<Path>) -> Result<RunConfig, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: RunConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env(&self) -> Result<RunConfig, ConfigError> {
        let mut config = RunConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(&self, path: Option<impl AsRef<Path>>) -> Result<RunConfig, ConfigError> {
        match path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut RunConfig) -> Result<(), ConfigError> {
        self.apply_overrides(config, |key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production)
    pub fn apply_overrides<F>(&self, config: &mut RunConfig, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}_{}", self.prefix, name));

        if let Some(url) = var("BASE_URL") {
            config.base_url = url;
        }
        if let Some(hosts) = var("HOSTS") {
            config.hosts = hosts
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(path) = var("JSON_OUT") {
            config.outputs.json = non_empty_path(&path);
        }
        if let Some(path) = var("HTML_OUT") {
            config.outputs.html = non_empty_path(&path);
        }
        if let Some(timeout) = var("REQUEST_TIMEOUT") {
            config.request_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                ConfigError::invalid(&format!("{}_REQUEST_TIMEOUT", self.prefix), e.to_string())
            })?;
        }

        Ok(())
    }
}

fn non_empty_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| PathBuf::from(raw))
}
