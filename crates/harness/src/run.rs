//! Run orchestration
//!
//! The run loop is the single scheduling authority: every tick it reads the
//! stage schedule, resizes the pool, updates the VU gauges and publishes
//! progress. It also watches for cancellation, fatal metric errors and
//! abort-on-fail thresholds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::{ConfigError, RunConfig};
use crate::executor::{NetworkError, ReqwestTransport, RequestExecutor, Transport};
use crate::metrics::{builtin, MetricError, MetricKind, MetricRegistry};
use crate::pool::VirtualUserPool;
use crate::scenario::Scenario;
use crate::stage::StageSchedule;
use crate::summary::{RunInfo, Summary};
use crate::threshold::ThresholdSet;

/// Why a run produced no summary
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metric integrity failure; the run halted
    #[error("run halted: {0}")]
    Metric(#[from] MetricError),

    #[error("failed to create HTTP client: {0}")]
    Client(#[from] NetworkError),
}

/// Live run state, readable without locks
#[derive(Debug, Default)]
pub struct RunProgress {
    elapsed_ms: AtomicU64,
    total_ms: AtomicU64,
    target: AtomicU64,
    active: AtomicU64,
    iterations: AtomicU64,
    finished: AtomicBool,
}

impl RunProgress {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }

    /// Scheduled length of the run
    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms.load(Ordering::Relaxed))
    }

    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Relaxed)
    }

    pub fn active_vus(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn update(&self, elapsed: Duration, target: u64, active: u64, iterations: u64) {
        self.elapsed_ms
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
        self.target.store(target, Ordering::Relaxed);
        self.active.store(active, Ordering::Relaxed);
        self.iterations.store(iterations, Ordering::Relaxed);
    }
}

/// Everything checked and built before the first virtual user starts
#[derive(Debug)]
pub struct RunPlan {
    pub registry: Arc<MetricRegistry>,
    pub schedule: StageSchedule,
    pub thresholds: ThresholdSet,
}

/// A configured load test
pub struct LoadTest {
    config: Arc<RunConfig>,
    transport: Option<Arc<dyn Transport>>,
    progress: Arc<RunProgress>,
}

impl LoadTest {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config: Arc::new(config),
            transport: None,
            progress: Arc::new(RunProgress::default()),
        }
    }

    /// Use a custom transport instead of the reqwest client
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Shared progress handle for observers
    pub fn progress(&self) -> Arc<RunProgress> {
        self.progress.clone()
    }

    /// Validate the configuration, declare metrics and compile thresholds
    pub fn plan(&self, scenario: &dyn Scenario) -> Result<RunPlan, ConfigError> {
        self.config.validate()?;
        let schedule = self.config.schedule()?;

        let registry = MetricRegistry::with_builtins();
        for decl in scenario.metrics() {
            registry.declare(&decl.name, decl.kind)?;
        }
        let thresholds = ThresholdSet::compile(&self.config.thresholds, &registry)?;

        Ok(RunPlan {
            registry: Arc::new(registry),
            schedule,
            thresholds,
        })
    }

    /// Execute the run to completion, cancellation or a fatal error
    #[instrument(skip_all, fields(scenario = %scenario.name()))]
    pub async fn run(
        &self,
        scenario: Arc<dyn Scenario>,
        cancel: CancellationToken,
    ) -> Result<Summary, RunError> {
        let RunPlan {
            registry,
            schedule,
            thresholds,
        } = self.plan(scenario.as_ref())?;

        let transport: Arc<dyn Transport> = match &self.transport {
            Some(transport) => transport.clone(),
            None => Arc::new(ReqwestTransport::with_timeout(self.config.request_timeout)?),
        };
        let executor = Arc::new(RequestExecutor::new(
            transport,
            registry.clone(),
            self.config.request_timeout,
        ));

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let mut pool =
            VirtualUserPool::new(scenario.clone(), executor, self.config.clone(), fatal_tx);

        let mut info = RunInfo::new(scenario.name());
        self.progress
            .total_ms
            .store(schedule.total_duration().as_millis() as u64, Ordering::Relaxed);
        info!(
            run_id = %info.run_id,
            duration = ?schedule.total_duration(),
            peak_vus = schedule.peak_target(),
            thresholds = thresholds.len(),
            "Load test started"
        );

        let start = Instant::now();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_abort_eval = self.config.threshold_interval;
        let mut vus_max = 0u64;
        let mut stop_reason: Option<String> = None;
        let mut fatal: Option<MetricError> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    info!("Run cancelled, stopping virtual users");
                    stop_reason = Some("cancelled".to_string());
                    break;
                }
                Some(e) = fatal_rx.recv() => {
                    fatal = Some(e);
                    break;
                }
            }

            let elapsed = start.elapsed();
            if schedule.is_finished(elapsed) {
                break;
            }

            let target = schedule.target_at(elapsed);
            pool.scale_to(target);
            let active = pool.active();
            vus_max = vus_max.max(active);
            if let Err(e) = record_vus(&registry, active, vus_max) {
                fatal = Some(e);
                break;
            }
            self.progress
                .update(elapsed, target, active, pool.iterations());

            if thresholds.has_abort_on_fail() && elapsed >= next_abort_eval {
                next_abort_eval = elapsed + self.config.threshold_interval;
                let snapshot = registry.snapshot_of(thresholds.abort_metrics(elapsed));
                if let Some(threshold) = thresholds.first_abort(&snapshot, elapsed) {
                    warn!(threshold = %threshold, "Abort-on-fail threshold crossed, stopping run");
                    stop_reason = Some(format!("threshold {}", threshold));
                    break;
                }
            }
        }

        if let Some(e) = fatal {
            error!(error = %e, "Fatal metric error, halting run");
            pool.drain(Duration::ZERO).await;
            self.progress.finished.store(true, Ordering::Release);
            return Err(RunError::Metric(e));
        }

        let iterations_before_drain = pool.iterations();
        let drained = pool.drain(self.config.graceful_stop).await;
        self.progress.finished.store(true, Ordering::Release);

        // A worker may have hit a fatal error while finishing its iteration
        if let Ok(e) = fatal_rx.try_recv() {
            error!(error = %e, "Fatal metric error while draining");
            return Err(RunError::Metric(e));
        }

        let elapsed = start.elapsed();
        record_vus(&registry, 0, vus_max)?;

        info.duration = elapsed;
        info.aborted = stop_reason;

        let snapshot = registry.snapshot();
        let iterations = snapshot
            .get(builtin::ITERATIONS)
            .and_then(|m| m.sink.sum())
            .unwrap_or(0.0) as u64;
        self.progress.update(elapsed, 0, 0, iterations);

        let results = thresholds.evaluate(&snapshot, elapsed);
        let summary = Summary::build(info, &snapshot, &thresholds, results);

        for failed in summary.failed_thresholds() {
            warn!(threshold = %failed, "Threshold failed");
        }
        info!(
            run_id = %summary.run_id,
            duration = ?elapsed,
            iterations,
            drained_iterations = iterations.saturating_sub(iterations_before_drain),
            aborted_vus = drained.aborted,
            passed = summary.thresholds_passed(),
            "Load test finished"
        );

        Ok(summary)
    }
}

fn record_vus(registry: &MetricRegistry, active: u64, peak: u64) -> Result<(), MetricError> {
    registry.record(builtin::VUS, MetricKind::Gauge, active)?;
    registry.record(builtin::VUS_MAX, MetricKind::Gauge, peak)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{PauseRange, ThresholdDef, ThresholdList};
    use crate::executor::{RawResponse, RequestSpec};
    use crate::scenario::HostRoutingScenario;
    use crate::stage::Stage;
    use crate::threshold::Verdict;

    struct StatusTransport {
        status: u16,
        delay: Duration,
    }

    #[async_trait]
    impl Transport for StatusTransport {
        async fn send(&self, request: &RequestSpec) -> Result<RawResponse, NetworkError> {
            tokio::time::sleep(self.delay).await;
            let host = request.host_header().unwrap_or_default();
            Ok(RawResponse {
                status: self.status,
                body: format!("Hello from {}", host),
            })
        }
    }

    fn config(stages: Vec<Stage>) -> RunConfig {
        RunConfig {
            stages,
            pause: PauseRange::fixed(Duration::from_millis(100)),
            ..Default::default()
        }
    }

    fn load_test(config: RunConfig, status: u16) -> LoadTest {
        LoadTest::new(config).with_transport(Arc::new(StatusTransport {
            status,
            delay: Duration::from_millis(50),
        }))
    }

    fn scenario(config: &RunConfig) -> Arc<dyn Scenario> {
        Arc::new(HostRoutingScenario::from_config(config).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_run_produces_summary() {
        let config = config(vec![
            Stage::new(Duration::from_secs(2), 4),
            Stage::new(Duration::from_secs(2), 0),
        ]);
        let test = load_test(config.clone(), 200);

        let summary = test
            .run(scenario(&config), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.scenario, "host-routing");
        assert_eq!(summary.vus_max, 4);
        assert!(summary.aborted.is_none());
        assert!(summary.value(builtin::ITERATIONS, "count").unwrap() > 0.0);
        let max = summary.value(builtin::HTTP_REQ_DURATION, "max").unwrap();
        assert!((50.0..51.0).contains(&max), "max was {}", max);
        assert_eq!(summary.value(builtin::VUS, "value"), Some(0.0));
        assert!(summary.thresholds_passed());

        let progress = test.progress();
        assert!(progress.is_finished());
        assert_eq!(progress.total(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_still_produces_summary() {
        let config = config(vec![Stage::new(Duration::from_secs(60), 2)]);
        let test = load_test(config.clone(), 200);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let summary = test.run(scenario(&config), cancel).await.unwrap();
        assert_eq!(summary.aborted.as_deref(), Some("cancelled"));
        assert!(summary.duration < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_on_fail_threshold_stops_run() {
        let mut config = config(vec![Stage::new(Duration::from_secs(60), 2)]);
        config.thresholds = BTreeMap::from([(
            builtin::HTTP_REQ_FAILED.to_string(),
            ThresholdList(vec![
                ThresholdDef::new("rate<0.1").abort_on_fail(Duration::from_secs(5)),
            ]),
        )]);
        let test = load_test(config.clone(), 503);

        let summary = test
            .run(scenario(&config), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary.aborted.as_deref(),
            Some("threshold http_req_failed: rate<0.1")
        );
        assert!(summary.duration >= Duration::from_secs(5));
        assert!(summary.duration < Duration::from_secs(10));
        let outcome = summary.metric(builtin::HTTP_REQ_FAILED).unwrap().thresholds["rate<0.1"];
        assert_eq!(outcome.verdict, Verdict::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_threshold_fails_before_start() {
        let mut config = config(vec![Stage::new(Duration::from_secs(1), 1)]);
        config.thresholds = BTreeMap::from([(
            "http_req_durations".to_string(),
            ["p(95)<500"].into_iter().collect::<ThresholdList>(),
        )]);
        let test = load_test(config.clone(), 200);

        let err = test
            .run(scenario(&config), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::UnknownMetric(_))));
        assert_eq!(test.progress().iterations(), 0);
    }
}
