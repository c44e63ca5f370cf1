//! # Surge Load-Test Harness
//!
//! Ramping virtual-user HTTP load generation with checks, typed metrics,
//! thresholds and text/JSON/HTML reports.
//!
//! ## Features
//!
//! - **Staged ramps**: linear interpolation of the virtual user count between stage targets
//! - **Virtual user pool**: tokio tasks looping iterations, retired only between iterations
//! - **Typed metrics**: counters, rates, trends and gauges, plus `name{tag:value}` submetrics
//! - **Thresholds**: `p(95)<500` style expressions, optionally aborting the run early
//! - **Reports**: fixed-layout text, round-trippable JSON and a standalone HTML page
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LoadTest::run                        │
//! │  (ticks the StageSchedule, sizes the pool, gauges, aborts)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      VirtualUserPool                        │
//! │  (one task per VU: iteration → pause → stop check)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Scenario → RequestExecutor → Checks                │
//! │  (timed requests through a Transport, tagged samples)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   MetricRegistry → ThresholdSet → Summary → report::*       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use surge_harness::prelude::*;
//!
//! let config = ConfigLoader::new().from_env()?;
//! let scenario = Arc::new(HostRoutingScenario::from_config(&config)?);
//! let summary = LoadTest::new(config)
//!     .run(scenario, CancellationToken::new())
//!     .await?;
//! println!("{}", render_text(&summary, &TextOptions::default()));
//! ```

pub mod check;
pub mod config;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod report;
pub mod run;
pub mod scenario;
pub mod stage;
pub mod summary;
pub mod threshold;

pub use tokio_util::sync::CancellationToken;

/// Prelude for common imports
pub mod prelude {
    pub use crate::check::{check_all, run_check, Check, CheckError};
    pub use crate::config::{
        ConfigError, ConfigLoader, OutputConfig, PauseRange, RunConfig, ThresholdDef,
        ThresholdList,
    };
    pub use crate::executor::{
        HttpMethod, NetworkError, RequestExecutor, RequestResult, RequestSpec, ReqwestTransport,
        Transport,
    };
    pub use crate::metrics::{builtin, MetricError, MetricKind, MetricRegistry, Sample, Tags};
    pub use crate::report::{render_html, render_json, render_text, ReportFormat, TextOptions};
    pub use crate::run::{LoadTest, RunError, RunProgress};
    pub use crate::scenario::{HostRoutingScenario, IterationError, MetricDecl, Scenario, VuContext};
    pub use crate::stage::{Stage, StageSchedule};
    pub use crate::summary::{MetricSummary, Summary};
    pub use crate::threshold::{ThresholdOutcome, ThresholdSet, Verdict};
    pub use crate::CancellationToken;
}
