use std::path::Path;

use anyhow::{Context, Result};
use surge_harness::config::ConfigLoader;
use surge_harness::run::LoadTest;
use surge_harness::scenario::{HostRoutingScenario, Scenario};

use crate::output::{print_field, print_table_header, print_table_row};
use crate::EXIT_OK;

pub fn run(config: Option<&Path>) -> Result<u8> {
    let config = ConfigLoader::new()
        .load(config)
        .context("failed to load configuration")?;
    let scenario = HostRoutingScenario::from_config(&config)?;
    let load_test = LoadTest::new(config);
    let plan = load_test.plan(&scenario).context("invalid configuration")?;
    let config = load_test.config();

    print_field("Scenario", scenario.name());
    print_field("Base URL", &config.base_url);
    print_field("Hosts", &config.hosts.join(", "));
    print_field(
        "Duration",
        &humantime_display(plan.schedule.total_duration()),
    );
    print_field("Peak VUs", &plan.schedule.peak_target().to_string());
    print_field(
        "Pause",
        &format!(
            "{} - {}",
            humantime_display(config.pause.min),
            humantime_display(config.pause.max)
        ),
    );
    println!();

    print_table_header(&[("STAGE", 6), ("DURATION", 10), ("TARGET", 6)]);
    for (i, stage) in plan.schedule.stages().iter().enumerate() {
        let index = (i + 1).to_string();
        let duration = humantime_display(stage.duration);
        let target = stage.target.to_string();
        print_table_row(&[(index.as_str(), 6), (duration.as_str(), 10), (target.as_str(), 6)]);
    }

    if !plan.thresholds.is_empty() {
        println!();
        print_table_header(&[("METRIC", 32), ("THRESHOLD", 16), ("ABORT", 5)]);
        for threshold in plan.thresholds.iter() {
            let abort = if threshold.abort_on_fail { "yes" } else { "no" };
            print_table_row(&[
                (threshold.metric.as_str(), 32),
                (threshold.source.as_str(), 16),
                (abort, 5),
            ]);
        }
    }

    println!();
    println!("Configuration is valid");
    Ok(EXIT_OK)
}

fn humantime_display(d: std::time::Duration) -> String {
    humantime::format_duration(d).to_string()
}
