// Logging setup
//
// Filter comes from RUST_LOG, then LOG_LEVEL, then a crate-scoped default.
// Output goes to stderr; stdout is reserved for reports.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "surge=info,surge_harness=info";
const QUIET_FILTER: &str = "surge=warn,surge_harness=warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Explicit filter directive, if any
    pub filter: Option<String>,
    pub quiet: bool,
}

impl LogConfig {
    pub fn from_env(quiet: bool) -> Self {
        Self {
            filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok())
                .filter(|f| !f.trim().is_empty()),
            quiet,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = if self.quiet {
            QUIET_FILTER
        } else {
            DEFAULT_FILTER
        };
        self.filter
            .as_deref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(fallback))
    }
}

/// Install the global subscriber; a second call is a no-op
pub fn init_logging(config: LogConfig) {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(config.env_filter());

    let _ = tracing_subscriber::registry().with(layer).try_init();
}
