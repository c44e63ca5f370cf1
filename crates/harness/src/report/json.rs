use tracing::warn;

use crate::summary::Summary;

/// Pretty JSON; parses back into an identical [`Summary`]
pub fn render_json(summary: &Summary) -> String {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Failed to serialize summary");
            serde_json::json!({ "error": e.to_string() }).to_string()
        }
    }
}
