// Report files
//
// Each artifact is written independently: one failing write is logged and
// reported, the others are still produced.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use surge_harness::config::OutputConfig;
use surge_harness::report::{render_html, render_json};
use surge_harness::summary::Summary;
use tracing::{error, info};

/// Write `contents` to `path`, creating parent directories
pub fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Outcome of writing every configured artifact
#[derive(Debug, Default)]
pub struct ArtifactReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

impl ArtifactReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Write the JSON and HTML reports named in `outputs`
pub fn write_all(summary: &Summary, outputs: &OutputConfig) -> ArtifactReport {
    let mut report = ArtifactReport::default();

    let targets = [
        (outputs.json.as_deref(), "json"),
        (outputs.html.as_deref(), "html"),
    ];
    for (path, kind) in targets {
        let Some(path) = path else {
            continue;
        };
        let contents = match kind {
            "json" => render_json(summary),
            _ => render_html(summary),
        };
        match write_artifact(path, &contents) {
            Ok(()) => {
                info!(path = %path.display(), kind, "Report written");
                report.written.push(path.to_path_buf());
            }
            Err(e) => {
                error!(path = %path.display(), kind, error = %format!("{:#}", e), "Failed to write report");
                report.failed.push(path.to_path_buf());
            }
        }
    }

    report
}
