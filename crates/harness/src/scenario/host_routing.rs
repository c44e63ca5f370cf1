//! Host-header routing scenario
//!
//! Every iteration picks one candidate host uniformly, sends `GET base_url`
//! with that `Host` header and checks that the reverse proxy routed it to the
//! matching backend: status 200 and a body naming the backend (the first DNS
//! label of the host, `foo` for `foo.localhost`).

use async_trait::async_trait;
use rand::Rng;

use super::{IterationError, MetricDecl, Scenario, VuContext};
use crate::check::Check;
use crate::config::{ConfigError, RunConfig};
use crate::executor::RequestSpec;
use crate::metrics::MetricKind;

/// Custom rate of failed iterations
pub const ERRORS: &str = "errors";

#[derive(Debug, Clone)]
struct Target {
    host: String,
    checks: Vec<Check>,
}

#[derive(Debug, Clone)]
pub struct HostRoutingScenario {
    name: String,
    base_url: String,
    targets: Vec<Target>,
}

impl HostRoutingScenario {
    pub fn new(
        base_url: impl Into<String>,
        hosts: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, ConfigError> {
        let targets: Vec<Target> = hosts
            .into_iter()
            .map(|host| {
                let host = host.into();
                let backend = backend_name(&host).to_string();
                Target {
                    checks: vec![
                        Check::status(200),
                        Check::body_contains("response contains expected text", backend),
                    ],
                    host,
                }
            })
            .collect();

        if targets.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "hosts".to_string(),
                reason: "at least one host is required".to_string(),
            });
        }

        Ok(Self {
            name: "host-routing".to_string(),
            base_url: base_url.into(),
            targets,
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self, ConfigError> {
        let mut scenario = Self::new(config.base_url.clone(), config.hosts.iter().cloned())?;
        scenario.name = config.name.clone();
        Ok(scenario)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.targets.iter().map(|t| t.host.as_str())
    }
}

/// First DNS label: `foo.localhost` → `foo`
pub fn backend_name(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

#[async_trait]
impl Scenario for HostRoutingScenario {
    fn name(&self) -> &str {
        &self.name
    }

    fn metrics(&self) -> Vec<MetricDecl> {
        vec![MetricDecl::new(ERRORS, MetricKind::Rate)]
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<(), IterationError> {
        let index = ctx.rng().gen_range(0..self.targets.len());
        let target = &self.targets[index];

        let request = RequestSpec::get(self.base_url.as_str())
            .with_header("Host", target.host.as_str())
            .with_tag("host", target.host.as_str());

        let result = ctx.request(request).await?;
        let success = ctx.check(&result, &target.checks)?;
        ctx.record(ERRORS, MetricKind::Rate, !success)?;

        Ok(())
    }
}
