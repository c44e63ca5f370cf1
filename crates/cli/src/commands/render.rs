use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use surge_harness::report::{ReportFormat, TextOptions};
use surge_harness::summary::Summary;
use tracing::info;

use crate::artifacts::write_artifact;
use crate::EXIT_OK;

pub fn run(summary: &Path, format: ReportFormat, output: Option<&Path>) -> Result<u8> {
    let rendered = render_file(summary, format)?;
    match output {
        Some(path) => {
            write_artifact(path, &rendered)?;
            info!(path = %path.display(), %format, "Report written");
        }
        None => print!("{}", rendered),
    }
    Ok(EXIT_OK)
}

fn render_file(summary: &Path, format: ReportFormat) -> Result<String> {
    let raw = fs::read_to_string(summary)
        .with_context(|| format!("failed to read {}", summary.display()))?;
    let summary: Summary = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a summary file", summary.display()))?;
    Ok(format.render(&summary, &TextOptions::default()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use surge_harness::report::render_json;

    use super::*;

    fn write_summary(dir: &Path) -> std::path::PathBuf {
        let summary = Summary {
            run_id: Default::default(),
            scenario: "host-routing".to_string(),
            started_at: Default::default(),
            duration: Duration::from_secs(120),
            aborted: Some("cancelled".to_string()),
            vus_max: 20,
            metrics: BTreeMap::new(),
            checks: BTreeMap::new(),
        };
        let path = dir.join("summary.json");
        fs::write(&path, render_json(&summary)).unwrap();
        path
    }

    #[test]
    fn test_render_text_from_saved_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_summary(dir.path());

        let text = render_file(&path, ReportFormat::Text).unwrap();
        assert!(text.contains("Test Results:"));
        assert!(text.contains("Aborted: cancelled"));
    }

    #[test]
    fn test_render_html_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_summary(dir.path());
        let out = dir.path().join("reports/report.html");

        let code = run(&path, ReportFormat::Html, Some(&out)).unwrap();
        assert_eq!(code, EXIT_OK);
        assert!(fs::read_to_string(out).unwrap().contains("host-routing"));
    }

    #[test]
    fn test_rejects_non_summary_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.json");
        fs::write(&path, r#"{"hello": "world"}"#).unwrap();

        let err = render_file(&path, ReportFormat::Json).unwrap_err();
        assert!(format!("{:#}", err).contains("not a summary file"));
    }
}
