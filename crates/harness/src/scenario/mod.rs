//! Scenarios
//!
//! A [`Scenario`] is the body of one iteration. Every virtual user calls
//! [`Scenario::iteration`] in a loop with its own [`VuContext`], which
//! carries the user's identity, its RNG and handles to the shared request
//! executor and metric registry.

pub mod host_routing;

use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::check::{self, Check};
use crate::config::RunConfig;
use crate::executor::{RequestExecutor, RequestResult, RequestSpec};
use crate::metrics::{MetricError, MetricKind, MetricRegistry, Sample, Tags};

pub use host_routing::HostRoutingScenario;

/// Why an iteration ended early
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    /// Metric integrity failure; halts the run
    #[error(transparent)]
    Metric(#[from] MetricError),

    /// Scenario-level failure; logged and the user keeps iterating
    #[error("{0}")]
    Failed(String),
}

impl IterationError {
    pub fn failed(msg: impl Into<String>) -> Self {
        IterationError::Failed(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, IterationError::Metric(_))
    }
}

/// Custom metric a scenario records, declared before the run starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDecl {
    pub name: String,
    pub kind: MetricKind,
}

impl MetricDecl {
    pub fn new(name: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Per-iteration test logic
#[async_trait]
pub trait Scenario: Send + Sync + 'static {
    /// Name reported in the summary
    fn name(&self) -> &str;

    /// Custom metrics, declared so thresholds can reference them
    fn metrics(&self) -> Vec<MetricDecl> {
        Vec::new()
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<(), IterationError>;
}

/// State a virtual user carries across its iterations
pub struct VuContext {
    vu_id: u64,
    iteration: u64,
    rng: StdRng,
    executor: Arc<RequestExecutor>,
    config: Arc<RunConfig>,
}

impl VuContext {
    pub fn new(vu_id: u64, executor: Arc<RequestExecutor>, config: Arc<RunConfig>) -> Self {
        Self {
            vu_id,
            iteration: 0,
            rng: StdRng::from_entropy(),
            executor,
            config,
        }
    }

    /// Replace the RNG, for reproducible runs
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// 1-based virtual user id
    pub fn vu_id(&self) -> u64 {
        self.vu_id
    }

    /// 0-based iteration number of this virtual user
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn registry(&self) -> &MetricRegistry {
        self.executor.registry()
    }

    /// Issue a request; network failures come back as status-0 results
    pub async fn request(&self, request: RequestSpec) -> Result<RequestResult, MetricError> {
        self.executor.execute(request).await
    }

    /// GET `url` with extra tags
    pub async fn http_get(
        &self,
        url: impl Into<String>,
        tags: Tags,
    ) -> Result<RequestResult, MetricError> {
        let mut request = RequestSpec::get(url);
        request.tags.extend(tags);
        self.request(request).await
    }

    /// Run every check against `result`; true when all passed
    pub fn check(&self, result: &RequestResult, checks: &[Check]) -> Result<bool, MetricError> {
        check::check_all(self.registry(), result, checks)
    }

    /// Record a custom metric sample
    pub fn record(
        &self,
        name: &str,
        kind: MetricKind,
        sample: impl Into<Sample>,
    ) -> Result<(), MetricError> {
        self.registry().record(name, kind, sample)
    }

    pub(crate) fn advance(&mut self) {
        self.iteration += 1;
    }
}
