//! HTML report
//!
//! Self-contained page: headline cards, a latency table for every trend,
//! the threshold verdicts and the check breakdown. A template error never
//! loses the report; the text summary is wrapped in a minimal page instead.

use minijinja::{context, Environment, HtmlEscape};
use serde::Serialize;
use tracing::warn;

use super::text::{render_text, TextOptions};
use super::fmt_opt;
use crate::metrics::{builtin, MetricKind};
use crate::summary::Summary;
use crate::threshold::Verdict;

#[derive(Serialize)]
struct Card {
    value: String,
    label: &'static str,
    desc: &'static str,
    class: &'static str,
}

#[derive(Serialize)]
struct TrendRow {
    name: String,
    min: String,
    avg: String,
    med: String,
    max: String,
    p90: String,
    p95: String,
}

#[derive(Serialize)]
struct ThresholdRow {
    metric: String,
    expression: String,
    marker: &'static str,
    verdict: String,
    observed: String,
    class: &'static str,
}

#[derive(Serialize)]
struct CheckRow {
    name: String,
    passes: u64,
    fails: u64,
    class: &'static str,
}

fn verdict_class(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Pass => "percentile-good",
        Verdict::Fail => "percentile-danger",
        Verdict::NoData => "percentile-warning",
    }
}

/// Render the HTML report, falling back to a plain page on template errors
pub fn render_html(summary: &Summary) -> String {
    match render_template(summary) {
        Ok(html) => html,
        Err(e) => {
            warn!(error = %e, "HTML report template failed, writing fallback page");
            fallback(summary)
        }
    }
}

fn render_template(summary: &Summary) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("report.html", REPORT_TEMPLATE)?;
    let template = env.get_template("report.html")?;

    let failed_rate = summary.value(builtin::HTTP_REQ_FAILED, "rate");
    let p95 = summary.value(builtin::HTTP_REQ_DURATION, "p(95)");

    let cards = vec![
        Card {
            value: summary
                .value(builtin::HTTP_REQS, "count")
                .map_or_else(|| "n/a".to_string(), |c| format!("{}", c as u64)),
            label: "Total Requests",
            desc: "Requests sent during the run",
            class: "",
        },
        Card {
            value: fmt_opt(summary.value(builtin::HTTP_REQS, "rate"), ""),
            label: "Requests/sec",
            desc: "Average over the whole run",
            class: "",
        },
        Card {
            value: fmt_opt(failed_rate.map(|r| r * 100.0), "%"),
            label: "Failed Requests",
            desc: "Status 0 or outside 200-399",
            class: if failed_rate.unwrap_or(0.0) > 0.0 {
                "warning"
            } else {
                ""
            },
        },
        Card {
            value: fmt_opt(summary.value(builtin::HTTP_REQ_DURATION, "avg"), "ms"),
            label: "Avg Duration",
            desc: "Send to full body received",
            class: "",
        },
        Card {
            value: fmt_opt(p95, "ms"),
            label: "P95 Duration",
            desc: "95% of requests were faster",
            class: "",
        },
        Card {
            value: summary.vus_max.to_string(),
            label: "Peak VUs",
            desc: "Most concurrent virtual users",
            class: "",
        },
    ];

    let trends: Vec<TrendRow> = summary
        .metrics
        .iter()
        .filter(|(_, m)| m.kind == MetricKind::Trend)
        .map(|(name, m)| TrendRow {
            name: name.clone(),
            min: fmt_opt(m.value("min"), ""),
            avg: fmt_opt(m.value("avg"), ""),
            med: fmt_opt(m.value("med"), ""),
            max: fmt_opt(m.value("max"), ""),
            p90: fmt_opt(m.value("p(90)"), ""),
            p95: fmt_opt(m.value("p(95)"), ""),
        })
        .collect();

    let thresholds: Vec<ThresholdRow> = summary
        .threshold_outcomes()
        .map(|(metric, expr, outcome)| ThresholdRow {
            metric: metric.to_string(),
            expression: expr.to_string(),
            marker: outcome.verdict.marker(),
            verdict: outcome.verdict.to_string(),
            observed: fmt_opt(outcome.observed, ""),
            class: verdict_class(outcome.verdict),
        })
        .collect();

    let checks: Vec<CheckRow> = summary
        .checks
        .iter()
        .map(|(name, tally)| CheckRow {
            name: name.clone(),
            passes: tally.passes,
            fails: tally.fails,
            class: if tally.fails == 0 {
                "percentile-good"
            } else {
                "percentile-danger"
            },
        })
        .collect();

    template.render(context! {
        title => "Load Test Report",
        scenario => summary.scenario,
        run_id => summary.run_id.to_string(),
        started_at => summary.started_at.to_rfc3339(),
        duration_secs => summary.duration.as_secs_f64(),
        aborted => summary.aborted,
        passed => summary.thresholds_passed(),
        cards => cards,
        trends => trends,
        thresholds => thresholds,
        checks => checks,
    })
}

fn fallback(summary: &Summary) -> String {
    let text = render_text(
        summary,
        &TextOptions {
            indent: String::new(),
            colors: false,
        },
    );
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head><meta charset=\"UTF-8\"><title>Load Test Report</title></head>\n<body>\n<h1>Load Test Report</h1>\n<pre>{}</pre>\n</body>\n</html>\n",
        HtmlEscape(&text)
    )
}

const REPORT_TEMPLATE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{ title }} - {{ scenario }}</title>
    <style>
        :root {
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #1f2940;
            --text-primary: #eee;
            --text-secondary: #888;
            --accent: #0f3460;
            --success: #00d26a;
            --warning: #f39c12;
            --danger: #e74c3c;
        }

        * {
            margin: 0;
            padding: 0;
            box-sizing: border-box;
        }

        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }

        .container {
            max-width: 1400px;
            margin: 0 auto;
            padding: 20px;
        }

        header {
            background: var(--bg-secondary);
            padding: 30px;
            margin-bottom: 30px;
            border-radius: 10px;
        }

        h1 { font-size: 2rem; margin-bottom: 10px; }
        h2 { font-size: 1.5rem; margin-bottom: 15px; }

        .subtitle { color: var(--text-secondary); font-size: 1.1rem; }
        .banner-pass { color: var(--success); font-weight: bold; }
        .banner-fail { color: var(--danger); font-weight: bold; }

        .stats-grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
            gap: 20px;
            margin-bottom: 30px;
        }

        .stat-card {
            background: var(--bg-card);
            padding: 20px;
            border-radius: 10px;
            text-align: center;
        }

        .stat-value { font-size: 2rem; font-weight: bold; color: var(--success); }
        .stat-value.warning { color: var(--warning); }
        .stat-label { color: var(--text-secondary); font-size: 0.9rem; margin-top: 5px; }
        .stat-desc { color: var(--text-secondary); font-size: 0.75rem; margin-top: 3px; font-style: italic; }

        .latency-table {
            background: var(--bg-card);
            padding: 20px;
            border-radius: 10px;
            margin-bottom: 20px;
        }

        table { width: 100%; border-collapse: collapse; margin-top: 10px; }
        th, td { padding: 12px; text-align: left; border-bottom: 1px solid var(--accent); }
        th { color: var(--text-secondary); font-weight: normal; }
        td { font-family: monospace; }

        .percentile-good { color: var(--success); }
        .percentile-warning { color: var(--warning); }
        .percentile-danger { color: var(--danger); }
    </style>
</head>
<body>
    <div class="container">
        <header>
            <h1>{{ title }}</h1>
            <div class="subtitle">{{ scenario }} | {{ started_at }} | Duration: {{ "%.2f"|format(duration_secs) }}s | Run {{ run_id }}</div>
            {% if passed %}
            <div class="banner-pass">All thresholds passed</div>
            {% else %}
            <div class="banner-fail">Thresholds failed</div>
            {% endif %}
            {% if aborted %}
            <div class="banner-fail">Aborted: {{ aborted }}</div>
            {% endif %}
        </header>

        <div class="stats-grid">
            {% for card in cards %}
            <div class="stat-card">
                <div class="stat-value {{ card.class }}">{{ card.value }}</div>
                <div class="stat-label">{{ card.label }}</div>
                <div class="stat-desc">{{ card.desc }}</div>
            </div>
            {% endfor %}
        </div>

        <div class="latency-table">
            <h2>Trends (ms)</h2>
            <table>
                <tr>
                    <th>Metric</th>
                    <th>Min</th>
                    <th>Avg</th>
                    <th>Med</th>
                    <th>Max</th>
                    <th>P90</th>
                    <th>P95</th>
                </tr>
                {% for row in trends %}
                <tr>
                    <td>{{ row.name }}</td>
                    <td>{{ row.min }}</td>
                    <td>{{ row.avg }}</td>
                    <td>{{ row.med }}</td>
                    <td>{{ row.max }}</td>
                    <td>{{ row.p90 }}</td>
                    <td>{{ row.p95 }}</td>
                </tr>
                {% endfor %}
            </table>
        </div>

        {% if thresholds %}
        <div class="latency-table">
            <h2>Thresholds</h2>
            <table>
                <tr>
                    <th></th>
                    <th>Metric</th>
                    <th>Expression</th>
                    <th>Observed</th>
                    <th>Verdict</th>
                </tr>
                {% for row in thresholds %}
                <tr>
                    <td class="{{ row.class }}">{{ row.marker }}</td>
                    <td>{{ row.metric }}</td>
                    <td>{{ row.expression }}</td>
                    <td>{{ row.observed }}</td>
                    <td class="{{ row.class }}">{{ row.verdict }}</td>
                </tr>
                {% endfor %}
            </table>
        </div>
        {% endif %}

        {% if checks %}
        <div class="latency-table">
            <h2>Checks</h2>
            <table>
                <tr>
                    <th>Check</th>
                    <th>Passes</th>
                    <th>Fails</th>
                </tr>
                {% for row in checks %}
                <tr>
                    <td class="{{ row.class }}">{{ row.name }}</td>
                    <td>{{ row.passes }}</td>
                    <td>{{ row.fails }}</td>
                </tr>
                {% endfor %}
            </table>
        </div>
        {% endif %}
    </div>
</body>
</html>
"##;
