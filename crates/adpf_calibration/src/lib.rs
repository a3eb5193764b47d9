//! ADPF Workload Calibration
//!
//! Searches the workload knobs (head count and physics iterations per stage)
//! until the median CPU work duration of a frame lands near a goal derived
//! from the display's frame interval.
//!
//! Each search is an explicit state object fed one [`Measurement`] at a time
//! and answering with the next [`CalibrationStep`]. [`run`] drives a search
//! against any [`Workload`], recording every round in the results.
//!
//! Two searches exist and they are not interchangeable:
//! - [`regression`] fits a line through (iterations, duration) samples and
//!   solves it for the goal, converging to within 2%.
//! - [`joint`] first scales the head count, then steps the iteration count,
//!   accepting anything inside a band of at least 1ms around the goal.

pub mod joint;
pub mod regression;

use adpf_core::time::NANOS_PER_MILLI;
use adpf_metrics::FrameStats;
use adpf_render::{RenderError, Renderer};
use thiserror::Error;

pub use joint::JointCalibration;
pub use regression::{RegressionCalibration, RegressionStats};

/// Upper bound on physics iterations either search will ask for.
pub const MAX_PHYSICS_ITERATIONS: u32 = 10_000;

/// Allowed overshoot of the cheapest workload before calibration gives up.
pub const FLOOR_MARGIN_NANOS: i64 = NANOS_PER_MILLI;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("no convergence after {rounds} rounds: last duration {duration}ns, goal {goal}ns")]
    NonConvergence { rounds: usize, goal: i64, duration: i64 },

    #[error("cheapest workload takes {floor}ns, more than 1ms over the {goal}ns goal")]
    FloorTooHigh { floor: i64, goal: i64 },

    #[error("measurement failed")]
    Render(#[from] RenderError),
}

/// Something whose per-frame cost can be tuned and measured.
pub trait Workload {
    fn set_num_heads(&mut self, heads: usize);

    fn set_physics_iterations(&mut self, iterations: u32);

    /// Run `samples` frames and reduce them.
    fn measure(&mut self, samples: usize) -> Result<FrameStats, RenderError>;

    fn add_result(&mut self, name: &str, value: String);
}

impl Workload for Renderer {
    fn set_num_heads(&mut self, heads: usize) {
        Renderer::set_num_heads(self, heads);
    }

    fn set_physics_iterations(&mut self, iterations: u32) {
        Renderer::set_physics_iterations(self, iterations);
    }

    fn measure(&mut self, samples: usize) -> Result<FrameStats, RenderError> {
        self.draw_frames_sync(samples, None)
    }

    fn add_result(&mut self, name: &str, value: String) {
        Renderer::add_result(self, name, value);
    }
}

/// Knob positions for one measurement round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkloadSetting {
    pub heads: usize,
    pub physics_iterations: u32,
}

/// Medians observed for one setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub setting: WorkloadSetting,
    pub duration: i64,
    pub interval: i64,
}

impl Measurement {
    pub fn from_stats(setting: WorkloadSetting, stats: &FrameStats) -> Self {
        Self {
            setting,
            duration: stats.median_work_duration,
            interval: stats.median_frame_interval,
        }
    }
}

/// Final state of a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub goal: i64,
    /// Median duration of the last accepted measurement.
    pub duration: i64,
    pub interval: i64,
    /// Setting the workload is left at.
    pub setting: WorkloadSetting,
    pub rounds: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationStep {
    Measure(WorkloadSetting),
    Done(Calibration),
}

/// A search state that consumes one measurement per round.
pub trait Calibrator {
    fn first_step(&self) -> CalibrationStep;

    fn record(&mut self, measurement: Measurement) -> Result<CalibrationStep, CalibrationError>;
}

/// Work duration a frame of `interval` should aim for.
pub fn goal_for_interval(interval: i64) -> i64 {
    (interval as f64 * 0.75) as i64
}

/// Drive `calibrator` against `workload` until it settles.
///
/// Every round is recorded as `calibration_<round>_*`; the outcome is
/// recorded as `goal`, `duration`, `heads_count`, `interval` and
/// `physics_iterations`.
pub fn run<W, C>(
    workload: &mut W,
    calibrator: &mut C,
    samples: usize,
) -> Result<Calibration, CalibrationError>
where
    W: Workload + ?Sized,
    C: Calibrator + ?Sized,
{
    let mut step = calibrator.first_step();
    let mut round = 0;
    loop {
        let setting = match step {
            CalibrationStep::Measure(setting) => setting,
            CalibrationStep::Done(calibration) => {
                apply(workload, calibration.setting);
                record_outcome(workload, &calibration);
                if calibration.converged {
                    tracing::info!(
                        goal = calibration.goal,
                        duration = calibration.duration,
                        heads = calibration.setting.heads,
                        iterations = calibration.setting.physics_iterations,
                        rounds = calibration.rounds,
                        "calibrated"
                    );
                } else {
                    tracing::warn!(
                        goal = calibration.goal,
                        duration = calibration.duration,
                        "calibration settled outside the goal band"
                    );
                }
                return Ok(calibration);
            }
        };

        apply(workload, setting);
        let stats = workload.measure(samples)?;
        let measurement = Measurement::from_stats(setting, &stats);
        record_round(workload, round, &measurement);
        tracing::debug!(
            round,
            heads = setting.heads,
            iterations = setting.physics_iterations,
            duration = measurement.duration,
            interval = measurement.interval,
            "calibration round"
        );
        round += 1;

        step = calibrator.record(measurement)?;
    }
}

fn apply<W: Workload + ?Sized>(workload: &mut W, setting: WorkloadSetting) {
    workload.set_num_heads(setting.heads);
    workload.set_physics_iterations(setting.physics_iterations);
}

fn record_round<W: Workload + ?Sized>(workload: &mut W, round: usize, measurement: &Measurement) {
    let key = |suffix: &str| format!("calibration_{round}_{suffix}");
    workload.add_result(&key("duration"), measurement.duration.to_string());
    workload.add_result(&key("interval"), measurement.interval.to_string());
    workload.add_result(&key("heads"), measurement.setting.heads.to_string());
    workload.add_result(
        &key("physicsIter"),
        measurement.setting.physics_iterations.to_string(),
    );
}

fn record_outcome<W: Workload + ?Sized>(workload: &mut W, calibration: &Calibration) {
    workload.add_result("goal", calibration.goal.to_string());
    workload.add_result("duration", calibration.duration.to_string());
    workload.add_result("heads_count", calibration.setting.heads.to_string());
    workload.add_result("interval", calibration.interval.to_string());
    workload.add_result(
        "physics_iterations",
        calibration.setting.physics_iterations.to_string(),
    );
}

/// Clamp a proposed iteration count into the range the pipeline accepts.
pub(crate) fn clamp_iterations(iterations: f64) -> u32 {
    if !iterations.is_finite() {
        return if iterations > 0.0 { MAX_PHYSICS_ITERATIONS } else { 1 };
    }
    iterations.round().clamp(1.0, f64::from(MAX_PHYSICS_ITERATIONS)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goal_is_three_quarters_of_the_interval() {
        assert_eq!(goal_for_interval(16_666_666), 12_499_999);
        assert_eq!(goal_for_interval(0), 0);
    }

    #[test]
    fn iteration_clamp() {
        assert_eq!(clamp_iterations(0.2), 1);
        assert_eq!(clamp_iterations(41.6), 42);
        assert_eq!(clamp_iterations(1e12), MAX_PHYSICS_ITERATIONS);
        assert_eq!(clamp_iterations(f64::INFINITY), MAX_PHYSICS_ITERATIONS);
        assert_eq!(clamp_iterations(f64::NAN), 1);
    }
}
