use std::fmt::Write;

use colored::Colorize;

use super::fmt_opt;
use crate::metrics::builtin;
use crate::summary::Summary;
use crate::threshold::Verdict;

/// Text summary options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextOptions {
    /// Prefix for every line
    pub indent: String,
    /// ANSI colours on check and threshold markers
    pub colors: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            indent: " ".to_string(),
            colors: false,
        }
    }
}

impl TextOptions {
    fn paint(&self, verdict: Verdict, text: &str) -> String {
        if !self.colors {
            return text.to_string();
        }
        match verdict {
            Verdict::Pass => text.green().to_string(),
            Verdict::Fail => text.red().to_string(),
            Verdict::NoData => text.yellow().to_string(),
        }
    }
}

/// Fixed-layout summary for stdout
pub fn render_text(summary: &Summary, options: &TextOptions) -> String {
    let i = options.indent.as_str();
    let reqs = |stat: &str| summary.value(builtin::HTTP_REQS, stat);
    let duration = |stat: &str| summary.value(builtin::HTTP_REQ_DURATION, stat);

    let total = reqs("count").map_or_else(|| "n/a".to_string(), |c| format!("{}", c as u64));
    let failed = fmt_opt(
        summary
            .value(builtin::HTTP_REQ_FAILED, "rate")
            .map(|r| r * 100.0),
        "%",
    );

    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = write!(
        out,
        "\n\
         {i}Test Results:\n\
         {i}=============\n\
         {i}Total Requests:     {total}\n\
         {i}Failed Requests:    {failed}\n\
         {i}Request Duration:\n\
         {i}  - Average:        {avg}\n\
         {i}  - P95:            {p95}\n\
         {i}  - P99:            {p99}\n\
         {i}Requests/sec:       {rps}\n",
        avg = fmt_opt(duration("avg"), "ms"),
        p95 = fmt_opt(duration("p(95)"), "ms"),
        p99 = fmt_opt(duration("p(99)"), "ms"),
        rps = fmt_opt(reqs("rate"), ""),
    );

    if !summary.checks.is_empty() {
        let _ = writeln!(out, "\n{i}Checks:");
        for (name, tally) in &summary.checks {
            let total = tally.passes + tally.fails;
            let verdict = if tally.fails == 0 {
                Verdict::Pass
            } else {
                Verdict::Fail
            };
            let pct = if total == 0 {
                0.0
            } else {
                tally.passes as f64 * 100.0 / total as f64
            };
            let _ = writeln!(
                out,
                "{i}  {} {name}: {}/{} ({pct:.2}%)",
                options.paint(verdict, verdict.marker()),
                tally.passes,
                total,
            );
        }
    }

    let outcomes: Vec<_> = summary.threshold_outcomes().collect();
    if !outcomes.is_empty() {
        let _ = writeln!(out, "\n{i}Thresholds:");
        for (metric, expr, outcome) in outcomes {
            let _ = writeln!(
                out,
                "{i}  {} {metric}: {expr} (observed {}, {})",
                options.paint(outcome.verdict, outcome.verdict.marker()),
                fmt_opt(outcome.observed, ""),
                outcome.verdict,
            );
        }
    }

    if let Some(reason) = &summary.aborted {
        let _ = writeln!(out, "\n{i}Aborted: {reason}");
    }

    out
}
