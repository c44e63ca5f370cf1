//! Virtual user pool
//!
//! Sized by a single scheduling authority (the run loop owns the pool by
//! `&mut`). Scaling down never interrupts an iteration: the newest workers
//! are told to stop and finish whatever they are doing first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PauseRange;
use crate::config::RunConfig;
use crate::executor::RequestExecutor;
use crate::metrics::{builtin, MetricError, MetricKind, MetricRegistry};
use crate::scenario::{IterationError, Scenario, VuContext};

struct Worker {
    id: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn signal_stop(&self) {
        // Receiver gone means the task already exited
        let _ = self.stop.send(true);
    }
}

/// How a drain ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Workers that finished their iteration and exited
    pub stopped: usize,
    /// Workers cut off at the graceful stop deadline
    pub aborted: usize,
}

/// Pool of concurrently iterating virtual users
pub struct VirtualUserPool {
    scenario: Arc<dyn Scenario>,
    executor: Arc<RequestExecutor>,
    config: Arc<RunConfig>,
    /// Running workers in start order
    active: Vec<Worker>,
    /// Workers told to stop that may still be finishing an iteration
    retiring: Vec<Worker>,
    next_id: u64,
    iterations: Arc<AtomicU64>,
    fatal: mpsc::UnboundedSender<MetricError>,
}

impl VirtualUserPool {
    /// Create an empty pool; fatal metric errors are sent to `fatal`
    pub fn new(
        scenario: Arc<dyn Scenario>,
        executor: Arc<RequestExecutor>,
        config: Arc<RunConfig>,
        fatal: mpsc::UnboundedSender<MetricError>,
    ) -> Self {
        Self {
            scenario,
            executor,
            config,
            active: Vec::new(),
            retiring: Vec::new(),
            next_id: 1,
            iterations: Arc::new(AtomicU64::new(0)),
            fatal,
        }
    }

    /// Workers that are not retiring
    pub fn active(&self) -> u64 {
        self.active.len() as u64
    }

    /// Worker tasks that have not exited yet, retiring ones included
    pub fn live(&self) -> u64 {
        self.active
            .iter()
            .chain(self.retiring.iter())
            .filter(|w| !w.handle.is_finished())
            .count() as u64
    }

    /// Completed iterations across all workers
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Start or retire workers until `active() == target`
    pub fn scale_to(&mut self, target: u64) {
        self.retiring.retain(|w| !w.handle.is_finished());

        let current = self.active();
        if target > current {
            for _ in current..target {
                self.spawn();
            }
            debug!(from = current, to = target, "Scaled up virtual users");
        } else if target < current {
            for _ in target..current {
                if let Some(worker) = self.active.pop() {
                    worker.signal_stop();
                    self.retiring.push(worker);
                }
            }
            debug!(from = current, to = target, "Retiring virtual users");
        }
    }

    /// Stop every worker and wait up to `grace` for them to exit
    #[instrument(skip(self), fields(live = self.live()))]
    pub async fn drain(mut self, grace: Duration) -> DrainOutcome {
        let mut workers: Vec<Worker> = self
            .active
            .drain(..)
            .chain(self.retiring.drain(..))
            .collect();

        for worker in &workers {
            worker.signal_stop();
        }

        let joined = tokio::time::timeout(
            grace,
            futures::future::join_all(workers.iter_mut().map(|w| &mut w.handle)),
        )
        .await;

        let total = workers.len();
        match joined {
            Ok(_) => {
                info!(stopped = total, "Virtual users stopped");
                DrainOutcome {
                    stopped: total,
                    aborted: 0,
                }
            }
            Err(_) => {
                let stragglers: Vec<u64> = workers
                    .iter()
                    .filter(|w| !w.handle.is_finished())
                    .map(|w| w.id)
                    .collect();
                for worker in &workers {
                    worker.handle.abort();
                }
                warn!(
                    aborted = stragglers.len(),
                    ?grace,
                    vus = ?stragglers,
                    "Graceful stop timed out, aborting virtual users"
                );
                DrainOutcome {
                    stopped: total - stragglers.len(),
                    aborted: stragglers.len(),
                }
            }
        }
    }

    fn spawn(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = VuContext::new(id, self.executor.clone(), self.config.clone());
        let handle = tokio::spawn(run_worker(
            ctx,
            self.scenario.clone(),
            self.config.pause,
            stop_rx,
            self.iterations.clone(),
            self.fatal.clone(),
        ));

        self.active.push(Worker {
            id,
            stop: stop_tx,
            handle,
        });
    }
}

async fn run_worker(
    mut ctx: VuContext,
    scenario: Arc<dyn Scenario>,
    pause: PauseRange,
    mut stop: watch::Receiver<bool>,
    iterations: Arc<AtomicU64>,
    fatal: mpsc::UnboundedSender<MetricError>,
) {
    let vu = ctx.vu_id();
    debug!(vu, "Virtual user started");

    loop {
        if *stop.borrow() || stop.has_changed().is_err() {
            break;
        }

        let start = Instant::now();
        let outcome = scenario.iteration(&mut ctx).await;
        let elapsed = start.elapsed();

        let recorded = match outcome {
            Ok(()) => record_iteration(ctx.registry(), elapsed),
            Err(IterationError::Metric(e)) => Err(e),
            Err(IterationError::Failed(msg)) => {
                warn!(vu, iteration = ctx.iteration(), error = %msg, "Iteration failed");
                record_iteration(ctx.registry(), elapsed)
            }
        };

        if let Err(e) = recorded {
            error!(vu, error = %e, "Metric integrity error, halting virtual user");
            let _ = fatal.send(e);
            break;
        }

        iterations.fetch_add(1, Ordering::Relaxed);
        ctx.advance();

        let pause = pause.sample(ctx.rng());
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.changed() => {}
        }
    }

    debug!(vu, iterations = ctx.iteration(), "Virtual user stopped");
}

fn record_iteration(registry: &MetricRegistry, elapsed: Duration) -> Result<(), MetricError> {
    registry.record(builtin::ITERATIONS, MetricKind::Counter, 1.0)?;
    registry.record(builtin::ITERATION_DURATION, MetricKind::Trend, elapsed)
}
