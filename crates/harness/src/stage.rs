//! Stage scheduler
//!
//! Turns an ordered list of `(duration, target)` stages into a target
//! virtual-user count for any point in the run. Each stage ramps linearly
//! from the previous target to its own; equal consecutive targets give a
//! plateau.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// One segment of the load ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the ramp towards `target` lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Concurrency reached at the end of the stage
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Validated, ordered stage sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSchedule {
    start_target: u64,
    stages: Vec<Stage>,
    total: Duration,
}

impl StageSchedule {
    /// Build a schedule starting from zero virtual users
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        Self::with_start_target(0, stages)
    }

    /// Build a schedule that starts at `start_target` virtual users
    pub fn with_start_target(start_target: u64, stages: Vec<Stage>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::InvalidStages(
                "at least one stage is required".to_string(),
            ));
        }

        if let Some(idx) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::InvalidStages(format!(
                "stage {} has a zero duration",
                idx + 1
            )));
        }

        let total = stages.iter().map(|s| s.duration).sum();

        Ok(Self {
            start_target,
            stages,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_target(&self) -> u64 {
        self.start_target
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest target any stage asks for
    pub fn peak_target(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_target, u64::max)
    }

    /// Whether the schedule has run out at `elapsed`
    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.total
    }

    /// Target concurrency at `elapsed` since run start
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut from = self.start_target;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let into = (elapsed - stage_start).as_secs_f64();
                let fraction = into / stage.duration.as_secs_f64();
                return interpolate(from, stage.target, fraction);
            }
            from = stage.target;
            stage_start = stage_end;
        }

        from
    }
}

fn interpolate(from: u64, to: u64, fraction: f64) -> u64 {
    let from = from as f64;
    let to = to as f64;
    let value = from + (to - from) * fraction.clamp(0.0, 1.0);
    // Round down on the way up and up on the way down, so a ramp never
    // overshoots either end point before the stage boundary.
    if to >= from {
        value.floor() as u64
    } else {
        value.ceil() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn stock_ramp() -> StageSchedule {
        StageSchedule::new(vec![
            Stage::new(secs(30), 10),
            Stage::new(secs(60), 20),
            Stage::new(secs(30), 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_ramp_plateau_and_ramp_down() {
        let schedule = stock_ramp();

        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(secs(15)), 5);
        assert_eq!(schedule.target_at(secs(30)), 10);
        assert_eq!(schedule.target_at(secs(60)), 15);
        assert_eq!(schedule.target_at(secs(90)), 20);
        assert_eq!(schedule.target_at(secs(105)), 10);
        assert_eq!(schedule.target_at(secs(120)), 0);
        assert_eq!(schedule.total_duration(), secs(120));
        assert_eq!(schedule.peak_target(), 20);
    }

    #[test]
    fn test_plateau_holds_constant() {
        let schedule =
            StageSchedule::new(vec![Stage::new(secs(10), 5), Stage::new(secs(10), 5)]).unwrap();

        for s in 10..20 {
            assert_eq!(schedule.target_at(secs(s)), 5);
        }
    }

    #[test]
    fn test_after_last_stage_holds_last_target() {
        let schedule = StageSchedule::new(vec![Stage::new(secs(5), 3)]).unwrap();

        assert!(!schedule.is_finished(secs(4)));
        assert!(schedule.is_finished(secs(5)));
        assert_eq!(schedule.target_at(secs(500)), 3);
    }

    #[test]
    fn test_start_target() {
        let schedule =
            StageSchedule::with_start_target(4, vec![Stage::new(secs(10), 0)]).unwrap();

        assert_eq!(schedule.target_at(Duration::ZERO), 4);
        assert_eq!(schedule.target_at(secs(5)), 2);
        assert_eq!(schedule.target_at(secs(10)), 0);
    }

    #[test]
    fn test_rejects_empty_and_zero_duration() {
        assert!(matches!(
            StageSchedule::new(vec![]),
            Err(ConfigError::InvalidStages(_))
        ));
        assert!(matches!(
            StageSchedule::new(vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)]),
            Err(ConfigError::InvalidStages(msg)) if msg.contains("stage 2")
        ));
    }

    fn arb_stages() -> impl Strategy<Value = (u64, Vec<Stage>)> {
        (
            0u64..50,
            prop::collection::vec((1u64..120_000, 0u64..200), 1..8),
        )
            .prop_map(|(start, raw)| {
                let stages = raw
                    .into_iter()
                    .map(|(ms, target)| Stage::new(Duration::from_millis(ms), target))
                    .collect();
                (start, stages)
            })
    }

    proptest! {
        #[test]
        fn prop_endpoints_match_stage_targets((start, stages) in arb_stages()) {
            let last = stages.last().unwrap().target;
            let schedule = StageSchedule::with_start_target(start, stages).unwrap();

            prop_assert_eq!(schedule.target_at(Duration::ZERO), start);
            prop_assert_eq!(schedule.target_at(schedule.total_duration()), last);
        }

        #[test]
        fn prop_target_stays_within_stage_bounds(
            (start, stages) in arb_stages(),
            at_ms in 0u64..1_000_000,
        ) {
            let schedule = StageSchedule::with_start_target(start, stages).unwrap();
            let target = schedule.target_at(Duration::from_millis(at_ms));
            prop_assert!(target <= schedule.peak_target());
        }
    }
}
