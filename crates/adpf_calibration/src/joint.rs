//! Head count first, then physics iterations
//!
//! While the heads are not yet fixed, each round rescales the head count:
//! down when the frame interval overran the measured interval by more than
//! 1ms, up (at most doubling) while the work is below an eighth of the goal.
//! Once neither applies the heads are fixed, and later rounds step the
//! iteration count toward the goal band.

use crate::{
    Calibration, CalibrationError, CalibrationStep, Calibrator, Measurement, WorkloadSetting,
    MAX_PHYSICS_ITERATIONS,
};
use adpf_core::time::NANOS_PER_MILLI;

pub const INITIAL_HEADS: usize = 5;
pub const MAX_HEADS: usize = 40;
pub const MAX_ROUNDS: usize = 10;

/// Minimum increase of the iteration count when the work is too light.
const MIN_ITERATION_STEP: i64 = 3;

/// Search state for the joint calibration.
#[derive(Debug, Clone)]
pub struct JointCalibration {
    goal: i64,
    duration_min: i64,
    duration_max: i64,
    interval_max: i64,
    heads: usize,
    // Signed: an overshooting first round can drive it to zero, which ends the search.
    physics_iterations: i64,
    heads_fixed: bool,
    duration: i64,
    interval: i64,
    rounds: usize,
}

impl JointCalibration {
    /// Start from the frame interval measured with a trivial workload.
    pub fn new(interval: i64) -> Self {
        let goal = crate::goal_for_interval(interval);
        let band = (interval / 8).max(NANOS_PER_MILLI);
        Self {
            goal,
            duration_min: goal - band,
            duration_max: goal + band,
            interval_max: interval + NANOS_PER_MILLI,
            heads: INITIAL_HEADS,
            physics_iterations: 1,
            heads_fixed: false,
            duration: 0,
            interval,
            rounds: 0,
        }
    }

    pub fn goal(&self) -> i64 {
        self.goal
    }

    /// Accepted duration range.
    pub fn band(&self) -> (i64, i64) {
        (self.duration_min, self.duration_max)
    }

    pub fn heads_fixed(&self) -> bool {
        self.heads_fixed
    }

    fn in_band(&self) -> bool {
        (self.duration_min..=self.duration_max).contains(&self.duration)
    }

    fn wants_another_round(&self) -> bool {
        let duration_off = !self.in_band() && self.physics_iterations > 0;
        let interval_over =
            self.interval > self.interval_max && self.heads > 1 && !self.heads_fixed;
        self.rounds < MAX_ROUNDS && (duration_off || interval_over)
    }

    fn setting(&self) -> WorkloadSetting {
        WorkloadSetting {
            heads: self.heads,
            physics_iterations: self.physics_iterations.clamp(0, i64::from(MAX_PHYSICS_ITERATIONS))
                as u32,
        }
    }

    fn step(&self) -> CalibrationStep {
        if self.wants_another_round() {
            return CalibrationStep::Measure(self.setting());
        }
        CalibrationStep::Done(Calibration {
            goal: self.goal,
            duration: self.duration,
            interval: self.interval,
            setting: self.setting(),
            rounds: self.rounds,
            converged: self.in_band(),
        })
    }

    fn adjust_heads(&mut self) {
        let heads = self.heads as f64;
        if self.interval > self.interval_max && self.heads > 1 {
            self.heads = (self.interval_max as f64 / self.interval as f64 * heads) as usize;
        } else if self.duration < self.goal / 8 && self.heads < MAX_HEADS {
            let scale = (self.goal as f64 / 8.0 / self.duration.max(1) as f64).min(2.0);
            self.heads = (scale * heads) as usize;
        } else {
            self.heads_fixed = true;
        }
        self.heads = self.heads.clamp(1, MAX_HEADS);
    }

    fn adjust_iterations(&mut self) {
        let ratio = self.goal as f64 / self.duration.max(1) as f64;
        let iterations = self.physics_iterations;
        if self.duration > self.duration_max {
            self.physics_iterations = (iterations - 1).min((ratio * iterations as f64) as i64);
        } else if self.duration < self.duration_min {
            self.physics_iterations =
                (iterations + MIN_ITERATION_STEP).max((ratio.sqrt() * iterations as f64) as i64);
        }
        self.physics_iterations = self
            .physics_iterations
            .min(i64::from(MAX_PHYSICS_ITERATIONS));
    }
}

impl Calibrator for JointCalibration {
    fn first_step(&self) -> CalibrationStep {
        self.step()
    }

    fn record(&mut self, measurement: Measurement) -> Result<CalibrationStep, CalibrationError> {
        self.duration = measurement.duration;
        self.interval = measurement.interval;
        self.rounds += 1;

        if !self.heads_fixed {
            self.adjust_heads();
        }
        if self.heads_fixed {
            self.adjust_iterations();
        }
        Ok(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: i64 = 16_000_000;

    fn measured(state: &JointCalibration, duration: i64, interval: i64) -> Measurement {
        let CalibrationStep::Measure(setting) = state.step() else {
            panic!("search already finished");
        };
        Measurement {
            setting,
            duration,
            interval,
        }
    }

    #[test]
    fn band_is_at_least_a_millisecond() {
        let state = JointCalibration::new(INTERVAL);
        assert_eq!(state.goal(), 12_000_000);
        assert_eq!(state.band(), (10_000_000, 14_000_000));

        let fast = JointCalibration::new(4_000_000);
        assert_eq!(fast.band(), (2_000_000, 4_000_000));
    }

    #[test]
    fn starts_with_five_heads_one_iteration() {
        let state = JointCalibration::new(INTERVAL);
        assert_eq!(
            state.first_step(),
            CalibrationStep::Measure(WorkloadSetting {
                heads: INITIAL_HEADS,
                physics_iterations: 1
            })
        );
    }

    #[test]
    fn light_work_doubles_heads_at_most() {
        let mut state = JointCalibration::new(INTERVAL);
        let m = measured(&state, 100_000, INTERVAL);
        let CalibrationStep::Measure(next) = state.record(m).unwrap() else {
            panic!("expected another round");
        };
        assert_eq!(next.heads, 10);
        assert!(!state.heads_fixed());
    }

    #[test]
    fn overrunning_interval_sheds_heads() {
        let mut state = JointCalibration::new(INTERVAL);
        let m = measured(&state, 5_000_000, 34_000_000);
        let CalibrationStep::Measure(next) = state.record(m).unwrap() else {
            panic!("expected another round");
        };
        // 17ms / 34ms of five heads.
        assert_eq!(next.heads, 2);
    }

    #[test]
    fn fixed_heads_step_iterations_up() {
        let mut state = JointCalibration::new(INTERVAL);
        let m = measured(&state, 3_000_000, INTERVAL);
        let CalibrationStep::Measure(next) = state.record(m).unwrap() else {
            panic!("expected another round");
        };
        assert!(state.heads_fixed());
        assert_eq!(next.heads, INITIAL_HEADS);
        // max(1 + 3, sqrt(4) * 1)
        assert_eq!(next.physics_iterations, 4);
    }

    #[test]
    fn duration_in_band_finishes() {
        let mut state = JointCalibration::new(INTERVAL);
        let m = measured(&state, 12_500_000, INTERVAL);
        let CalibrationStep::Done(calibration) = state.record(m).unwrap() else {
            panic!("expected the search to finish");
        };
        assert!(calibration.converged);
        assert_eq!(calibration.duration, 12_500_000);
        assert_eq!(calibration.rounds, 1);
    }

    #[test]
    fn overshoot_at_one_iteration_ends_search() {
        let mut state = JointCalibration::new(INTERVAL);
        let m = measured(&state, 30_000_000, INTERVAL);
        let CalibrationStep::Done(calibration) = state.record(m).unwrap() else {
            panic!("expected the search to finish");
        };
        assert!(!calibration.converged);
        assert_eq!(calibration.setting.physics_iterations, 0);
    }

    #[test]
    fn rounds_are_capped() {
        let mut state = JointCalibration::new(INTERVAL);
        let mut step = state.first_step();
        let mut rounds = 0;
        while let CalibrationStep::Measure(setting) = step {
            step = state
                .record(Measurement {
                    setting,
                    duration: 2_000_000,
                    interval: INTERVAL,
                })
                .unwrap();
            rounds += 1;
        }
        assert_eq!(rounds, MAX_ROUNDS);
    }
}
