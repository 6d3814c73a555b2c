//! Virtual-user schedules

use std::time::Duration;

use qa_core::{QaError, QaResult};
use serde::{Deserialize, Serialize};

/// One ramping stage: reach `target` VUs over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// Schedule defines how many virtual users are alive over time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Exactly `vus` workers for `duration`
    Constant { vus: usize, duration: Duration },

    /// Walk the stages in order, interpolating linearly from the previous
    /// target (or `start_vus`) to each stage's target.
    Ramping { start_vus: usize, stages: Vec<Stage> },
}

impl Schedule {
    pub fn constant(vus: usize, duration: Duration) -> Self {
        Self::Constant { vus, duration }
    }

    pub fn ramping(start_vus: usize, stages: Vec<Stage>) -> Self {
        Self::Ramping { start_vus, stages }
    }

    /// Reject schedules that can never produce load.
    pub fn validate(&self) -> QaResult<()> {
        match self {
            Self::Constant { duration, .. } if duration.is_zero() => {
                Err(QaError::validation("constant schedule needs a non-zero duration"))
            }
            Self::Ramping { stages, .. } if stages.is_empty() => {
                Err(QaError::validation("ramping schedule needs at least one stage"))
            }
            _ => Ok(()),
        }
    }

    /// Total length of the schedule
    pub fn total_duration(&self) -> Duration {
        match self {
            Self::Constant { duration, .. } => *duration,
            Self::Ramping { stages, .. } => stages.iter().map(|s| s.duration).sum(),
        }
    }

    /// Highest population the schedule ever asks for
    pub fn peak_vus(&self) -> usize {
        match self {
            Self::Constant { vus, .. } => *vus,
            Self::Ramping { start_vus, stages } => stages
                .iter()
                .map(|s| s.target)
                .fold(*start_vus, usize::max),
        }
    }

    /// Target population at `elapsed` since the scenario started. Zero
    /// once the schedule has ended.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        match self {
            Self::Constant { vus, duration } => {
                if elapsed < *duration {
                    *vus
                } else {
                    0
                }
            }

            Self::Ramping { start_vus, stages } => {
                let mut from = *start_vus;
                let mut stage_start = Duration::ZERO;
                for stage in stages {
                    let stage_end = stage_start + stage.duration;
                    if elapsed < stage_end {
                        let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                        let delta = (stage.target as f64 - from as f64) * progress;
                        return (from as f64 + delta).round().max(0.0) as usize;
                    }
                    from = stage.target;
                    stage_start = stage_end;
                }
                0
            }
        }
    }

    /// Get description of this schedule
    pub fn description(&self) -> String {
        match self {
            Self::Constant { vus, duration } => format!("constant {vus} VUs for {duration:?}"),
            Self::Ramping { start_vus, stages } => {
                let targets: Vec<String> = stages.iter().map(|s| format!("{}@{:?}", s.target, s.duration)).collect();
                format!("ramping from {start_vus}: {}", targets.join(" -> "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn ramp_tracks_linear_interpolation(
            from in 0usize..500,
            to in 0usize..500,
            secs in 1u64..600,
            at_ms in 0u64..600_000,
        ) {
            let duration = Duration::from_secs(secs);
            let elapsed = Duration::from_millis(at_ms % (secs * 1000));
            let schedule = Schedule::ramping(from, vec![Stage::new(duration, to)]);

            let expected = from as f64 + (to as f64 - from as f64) * elapsed.as_secs_f64() / duration.as_secs_f64();
            let live = schedule.target_at(elapsed) as f64;
            prop_assert!((live - expected).abs() <= 1.0, "live {} expected {}", live, expected);
            prop_assert!(live as usize <= from.max(to));
        }
    }

    #[test]
    fn test_constant_schedule() {
        let schedule = Schedule::constant(10, Duration::from_secs(60));

        assert_eq!(schedule.target_at(Duration::ZERO), 10);
        assert_eq!(schedule.target_at(Duration::from_secs(59)), 10);
        assert_eq!(schedule.target_at(Duration::from_secs(60)), 0);
        assert_eq!(schedule.total_duration(), Duration::from_secs(60));
        assert_eq!(schedule.peak_vus(), 10);
    }

    #[test]
    fn test_ramping_schedule() {
        let schedule = Schedule::ramping(
            0,
            vec![
                Stage::new(Duration::from_secs(10), 100),
                Stage::new(Duration::from_secs(20), 100),
                Stage::new(Duration::from_secs(10), 0),
            ],
        );

        assert_eq!(schedule.target_at(Duration::ZERO), 0);
        assert_eq!(schedule.target_at(Duration::from_secs(5)), 50); // Midpoint
        assert_eq!(schedule.target_at(Duration::from_secs(10)), 100);
        assert_eq!(schedule.target_at(Duration::from_secs(25)), 100);
        assert_eq!(schedule.target_at(Duration::from_secs(35)), 50);
        assert_eq!(schedule.target_at(Duration::from_secs(40)), 0);
        assert_eq!(schedule.total_duration(), Duration::from_secs(40));
        assert_eq!(schedule.peak_vus(), 100);
    }

    #[test]
    fn test_zero_duration_stage_jumps() {
        let schedule = Schedule::ramping(
            5,
            vec![
                Stage::new(Duration::ZERO, 50),
                Stage::new(Duration::from_secs(10), 50),
            ],
        );
        assert_eq!(schedule.target_at(Duration::ZERO), 50);
        assert_eq!(schedule.target_at(Duration::from_secs(9)), 50);
    }

    #[test]
    fn test_validation() {
        assert!(Schedule::constant(1, Duration::ZERO).validate().is_err());
        assert!(Schedule::ramping(0, vec![]).validate().is_err());
        assert!(Schedule::constant(0, Duration::from_secs(1)).validate().is_ok());
    }
}
