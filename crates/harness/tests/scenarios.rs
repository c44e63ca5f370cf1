//! Full-length scenarios under a paused clock

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use surge_harness::prelude::*;
use surge_harness::executor::RawResponse;

/// Backend that answers after a fixed delay, naming the routed host
struct DelayedBackend {
    delay: Duration,
    requests: AtomicU64,
}

#[async_trait]
impl Transport for DelayedBackend {
    async fn send(&self, request: &RequestSpec) -> Result<RawResponse, NetworkError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.delay).await;
        let host = request.host_header().unwrap_or_default();
        Ok(RawResponse {
            status: 200,
            body: format!("<h1>{}</h1>", host),
        })
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_stock_ramp_passes_latency_threshold() {
    let config = RunConfig::default();
    let backend = Arc::new(DelayedBackend {
        delay: Duration::from_millis(100),
        requests: AtomicU64::new(0),
    });
    let scenario = Arc::new(HostRoutingScenario::from_config(&config).unwrap());

    let test = LoadTest::new(config).with_transport(backend.clone());
    let summary = test.run(scenario, CancellationToken::new()).await.unwrap();

    assert!(summary.thresholds_passed(), "{:?}", summary.failed_thresholds());
    assert!(summary.aborted.is_none());
    assert_eq!(summary.vus_max, 20);
    assert!(summary.duration >= Duration::from_secs(120));

    let p95 = summary.value(builtin::HTTP_REQ_DURATION, "p(95)").unwrap();
    assert!((100.0..101.0).contains(&p95), "p95 was {}", p95);

    let outcome = summary.metric(builtin::HTTP_REQ_DURATION).unwrap().thresholds["p(95)<500"];
    assert_eq!(outcome.verdict, Verdict::Pass);

    let requests = backend.requests.load(Ordering::Relaxed) as f64;
    assert_eq!(summary.value(builtin::HTTP_REQS, "count"), Some(requests));
    assert_eq!(summary.value(builtin::ITERATIONS, "count"), Some(requests));
    assert_eq!(summary.value("errors", "rate"), Some(0.0));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_slow_backend_fails_latency_threshold() {
    let mut config = RunConfig::default();
    config.stages = vec![Stage::new(Duration::from_secs(10), 5)];
    config.request_timeout = Duration::from_secs(2);
    let backend = Arc::new(DelayedBackend {
        delay: Duration::from_millis(800),
        requests: AtomicU64::new(0),
    });
    let scenario = Arc::new(HostRoutingScenario::from_config(&config).unwrap());

    let summary = LoadTest::new(config)
        .with_transport(backend)
        .run(scenario, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.failed_thresholds(),
        vec!["http_req_duration: p(95)<500".to_string()]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_timeouts_become_failed_requests() {
    let mut config = RunConfig::default();
    config.stages = vec![Stage::new(Duration::from_secs(5), 2)];
    config.request_timeout = Duration::from_millis(200);
    let backend = Arc::new(DelayedBackend {
        delay: Duration::from_secs(10),
        requests: AtomicU64::new(0),
    });
    let scenario = Arc::new(HostRoutingScenario::from_config(&config).unwrap());

    let summary = LoadTest::new(config)
        .with_transport(backend)
        .run(scenario, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.value(builtin::HTTP_REQ_FAILED, "rate"), Some(1.0));
    assert_eq!(summary.value("errors", "rate"), Some(1.0));
    let max = summary.value(builtin::HTTP_REQ_DURATION, "max").unwrap();
    assert!((200.0..201.0).contains(&max), "max was {}", max);
}

/// Declares one custom metric, then records a sample that does not fit it
struct MisrecordingScenario {
    metric: &'static str,
    declared: MetricKind,
    recorded: MetricKind,
    value: f64,
}

#[async_trait]
impl Scenario for MisrecordingScenario {
    fn name(&self) -> &str {
        "misrecording"
    }

    fn metrics(&self) -> Vec<MetricDecl> {
        vec![MetricDecl::new(self.metric, self.declared)]
    }

    async fn iteration(&self, ctx: &mut VuContext) -> Result<(), IterationError> {
        ctx.http_get("http://localhost/", Tags::new()).await?;
        ctx.record(self.metric, self.recorded, self.value)?;
        Ok(())
    }
}

/// Run a scenario expected to hit a fatal metric error and return it
async fn fatal_metric_error(scenario: MisrecordingScenario) -> MetricError {
    let mut config = RunConfig::default();
    config.start_vus = 5;
    config.stages = vec![Stage::new(Duration::from_secs(30), 5)];
    let backend = Arc::new(DelayedBackend {
        delay: Duration::from_millis(10),
        requests: AtomicU64::new(0),
    });

    let test = LoadTest::new(config).with_transport(backend);
    let progress = test.progress();
    let result = test.run(Arc::new(scenario), CancellationToken::new()).await;

    assert!(progress.is_finished());
    assert!(progress.elapsed() < Duration::from_secs(1));
    match result {
        Err(RunError::Metric(e)) => e,
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(summary) => panic!("run produced a summary: {summary:?}"),
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_numeric_sample_into_rate_halts_without_summary() {
    let err = fatal_metric_error(MisrecordingScenario {
        metric: "errors",
        declared: MetricKind::Rate,
        recorded: MetricKind::Rate,
        value: 1.0,
    })
    .await;

    assert_eq!(
        err,
        MetricError::TypeMismatch {
            name: "errors".to_string(),
            registered: MetricKind::Rate,
            requested: MetricKind::Trend,
        }
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_kind_conflict_halts_without_summary() {
    let err = fatal_metric_error(MisrecordingScenario {
        metric: "errors",
        declared: MetricKind::Rate,
        recorded: MetricKind::Counter,
        value: 1.0,
    })
    .await;

    assert_eq!(
        err,
        MetricError::TypeMismatch {
            name: "errors".to_string(),
            registered: MetricKind::Rate,
            requested: MetricKind::Counter,
        }
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_nan_sample_halts_without_summary() {
    let err = fatal_metric_error(MisrecordingScenario {
        metric: "backend_latency",
        declared: MetricKind::Trend,
        recorded: MetricKind::Trend,
        value: f64::NAN,
    })
    .await;

    assert_eq!(
        err,
        MetricError::InvalidSample {
            name: "backend_latency".to_string(),
            kind: MetricKind::Trend,
            sample: "non-finite",
        }
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_summary_json_round_trip() {
    let mut config = RunConfig::default();
    config.stages = vec![
        Stage::new(Duration::from_secs(3), 3),
        Stage::new(Duration::from_secs(3), 0),
    ];
    let backend = Arc::new(DelayedBackend {
        delay: Duration::from_millis(25),
        requests: AtomicU64::new(0),
    });
    let scenario = Arc::new(HostRoutingScenario::from_config(&config).unwrap());

    let summary = LoadTest::new(config)
        .with_transport(backend)
        .run(scenario, CancellationToken::new())
        .await
        .unwrap();

    let json = render_json(&summary);
    let back: Summary = serde_json::from_str(&json).unwrap();
    assert_eq!(back, summary);
    assert_eq!(
        back.metrics.keys().collect::<Vec<_>>(),
        summary.metrics.keys().collect::<Vec<_>>()
    );
}
