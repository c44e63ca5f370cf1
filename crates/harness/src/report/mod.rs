//! Report rendering
//!
//! Every renderer is a total function of a [`Summary`]: missing metrics show
//! as `n/a` in text and HTML and are simply absent from JSON.

mod html;
mod json;
mod text;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::summary::Summary;

pub use html::render_html;
pub use json::render_json;
pub use text::{render_text, TextOptions};

/// Output format for a rendered summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Html,
}

impl ReportFormat {
    pub fn render(&self, summary: &Summary, text: &TextOptions) -> String {
        match self {
            ReportFormat::Text => render_text(summary, text),
            ReportFormat::Json => render_json(summary),
            ReportFormat::Html => render_html(summary),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Html => write!(f, "html"),
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// `value` with two decimals, or `n/a`
pub(crate) fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.2}{}", v, unit),
        _ => "n/a".to_string(),
    }
}
