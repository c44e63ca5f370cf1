use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use surge_harness::config::{ConfigLoader, RunConfig};
use surge_harness::report::{render_text, TextOptions};
use surge_harness::run::LoadTest;
use surge_harness::scenario::HostRoutingScenario;
use surge_harness::CancellationToken;
use tracing::{info, warn};

use crate::progress::ProgressReporter;
use crate::{artifacts, EXIT_ERROR, EXIT_OK, EXIT_THRESHOLDS_FAILED};

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Configuration file (YAML); defaults apply when omitted
    #[arg(long, short, env = "SURGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the request target
    #[arg(long)]
    pub base_url: Option<String>,

    /// Override the Host header candidates (repeatable)
    #[arg(long = "host")]
    pub hosts: Vec<String>,

    /// Write the JSON summary here
    #[arg(long)]
    pub json_out: Option<PathBuf>,

    /// Write the HTML report here
    #[arg(long)]
    pub html_out: Option<PathBuf>,

    /// Skip the text summary on stdout
    #[arg(long)]
    pub no_text: bool,
}

impl RunArgs {
    /// Command-line flags take precedence over file and environment values
    fn apply(&self, config: &mut RunConfig) {
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if !self.hosts.is_empty() {
            config.hosts = self.hosts.clone();
        }
        if let Some(path) = &self.json_out {
            config.outputs.json = Some(path.clone());
        }
        if let Some(path) = &self.html_out {
            config.outputs.html = Some(path.clone());
        }
        if self.no_text {
            config.outputs.text = false;
        }
    }
}

pub async fn run(args: RunArgs, quiet: bool) -> Result<u8> {
    let mut config = ConfigLoader::new()
        .load(args.config.as_deref())
        .context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let scenario = Arc::new(HostRoutingScenario::from_config(&config)?);
    let outputs = config.outputs.clone();
    let load_test = LoadTest::new(config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the run");
            ctrl_c.cancel();
        }
    });

    let reporter = (!quiet).then(|| ProgressReporter::start(load_test.progress()));
    let result = load_test.run(scenario, cancel).await;
    if let Some(reporter) = reporter {
        reporter.finish().await;
    }
    let summary = result?;

    if outputs.text {
        let options = TextOptions {
            indent: outputs.text_indent.clone(),
            colors: outputs.colors,
        };
        print!("{}", render_text(&summary, &options));
    }

    let written = artifacts::write_all(&summary, &outputs);
    if !written.is_ok() {
        return Ok(EXIT_ERROR);
    }

    if summary.thresholds_passed() {
        info!(run_id = %summary.run_id, "All thresholds passed");
        Ok(EXIT_OK)
    } else {
        warn!(failed = ?summary.failed_thresholds(), "Thresholds failed");
        Ok(EXIT_THRESHOLDS_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = RunArgs {
            base_url: Some("http://127.0.0.1:8080/".to_string()),
            hosts: vec!["baz.localhost".to_string()],
            json_out: Some(PathBuf::from("out/s.json")),
            no_text: true,
            ..Default::default()
        };
        let mut config = RunConfig::default();
        args.apply(&mut config);

        assert_eq!(config.base_url, "http://127.0.0.1:8080/");
        assert_eq!(config.hosts, vec!["baz.localhost"]);
        assert_eq!(config.outputs.json, Some(PathBuf::from("out/s.json")));
        assert_eq!(
            config.outputs.html,
            RunConfig::default().outputs.html,
            "unset flags leave the config alone"
        );
        assert!(!config.outputs.text);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let mut config = RunConfig::default();
        RunArgs::default().apply(&mut config);
        assert_eq!(config.hosts, RunConfig::default().hosts);
        assert!(config.outputs.text);
    }
}
