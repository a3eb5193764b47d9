//! Iteration search by linear regression
//!
//! Frame cost grows roughly linearly with the physics iteration count, so
//! after two seed measurements every round fits a least-squares line through
//! the retained samples and measures the iteration count the line predicts
//! will hit the goal. Every fourth round the sample lying furthest above the
//! line is discarded first; only overshoots are discarded, since a slow frame
//! is far more likely to be noise than a fast one.

use crate::{
    clamp_iterations, Calibration, CalibrationError, CalibrationStep, Calibrator, Measurement,
    WorkloadSetting, FLOOR_MARGIN_NANOS,
};

/// Iteration counts measured before the first fit.
pub const SEED_ITERATIONS: [u32; 2] = [1, 32];

/// Accepted relative distance between the median duration and the goal.
pub const TOLERANCE: f64 = 0.02;

/// Measurements allowed, seeds included.
pub const ROUND_BUDGET: usize = 20;

/// Rounds between outlier drops.
pub const OUTLIER_PERIOD: usize = 4;

/// Least-squares line mapping iterations to duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionStats {
    pub slope: f64,
    pub intercept: f64,
}

impl RegressionStats {
    /// `None` unless there are at least two distinct x values.
    pub fn fit(points: &[(f64, f64)]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mean_x = points.iter().map(|&(x, _)| x).sum::<f64>() / n;
        let mean_y = points.iter().map(|&(_, y)| y).sum::<f64>() / n;

        let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), &(x, y)| {
            let dx = x - mean_x;
            (sxx + dx * dx, sxy + dx * (y - mean_y))
        });
        if sxx <= f64::EPSILON {
            return None;
        }

        let slope = sxy / sxx;
        Some(Self {
            slope,
            intercept: mean_y - slope * mean_x,
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// The x at which the line reaches `y`; `None` unless the line rises.
    pub fn solve(&self, y: f64) -> Option<f64> {
        (self.slope > 0.0).then(|| (y - self.intercept) / self.slope)
    }
}

/// Search state for the regression calibration.
#[derive(Debug, Clone)]
pub struct RegressionCalibration {
    goal: i64,
    heads: usize,
    samples: Vec<Measurement>,
    rounds: usize,
}

impl RegressionCalibration {
    /// Search iteration counts with a fixed head count.
    pub fn new(goal: i64, heads: usize) -> Self {
        Self {
            goal,
            heads: heads.max(1),
            samples: Vec::new(),
            rounds: 0,
        }
    }

    pub fn goal(&self) -> i64 {
        self.goal
    }

    /// Samples the next fit will use.
    pub fn samples(&self) -> &[Measurement] {
        &self.samples
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn relative_error(&self, duration: i64) -> f64 {
        if self.goal <= 0 {
            return f64::INFINITY;
        }
        (duration - self.goal).abs() as f64 / self.goal as f64
    }

    pub fn fit(&self) -> Option<RegressionStats> {
        let points: Vec<(f64, f64)> = self
            .samples
            .iter()
            .map(|s| (f64::from(s.setting.physics_iterations), s.duration as f64))
            .collect();
        RegressionStats::fit(&points)
    }

    /// Iteration count to measure next.
    pub fn next_iterations(&mut self) -> u32 {
        if self.rounds % OUTLIER_PERIOD == 0 {
            self.drop_worst_overshoot();
        }

        if let Some(iterations) = self.fit().and_then(|fit| fit.solve(self.goal as f64)) {
            return clamp_iterations(iterations);
        }

        // Line is flat or falling: step away from the last sample instead.
        match self.samples.last() {
            Some(last) if last.duration < self.goal => {
                clamp_iterations(f64::from(last.setting.physics_iterations) * 2.0)
            }
            Some(last) => clamp_iterations(f64::from(last.setting.physics_iterations) / 2.0),
            None => SEED_ITERATIONS[0],
        }
    }

    fn drop_worst_overshoot(&mut self) {
        if self.samples.len() <= 2 {
            return;
        }
        let Some(fit) = self.fit() else {
            return;
        };
        let worst = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let residual = s.duration as f64 - fit.predict(f64::from(s.setting.physics_iterations));
                (i, residual)
            })
            .filter(|&(_, residual)| residual > 0.0)
            .max_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((index, residual)) = worst {
            let dropped = self.samples.remove(index);
            tracing::debug!(
                iterations = dropped.setting.physics_iterations,
                duration = dropped.duration,
                residual,
                "dropped calibration outlier"
            );
        }
    }

    fn setting(&self, physics_iterations: u32) -> WorkloadSetting {
        WorkloadSetting {
            heads: self.heads,
            physics_iterations,
        }
    }
}

impl Calibrator for RegressionCalibration {
    fn first_step(&self) -> CalibrationStep {
        CalibrationStep::Measure(self.setting(SEED_ITERATIONS[0]))
    }

    fn record(&mut self, measurement: Measurement) -> Result<CalibrationStep, CalibrationError> {
        self.rounds += 1;
        self.samples.push(measurement);

        if self.relative_error(measurement.duration) < TOLERANCE {
            return Ok(CalibrationStep::Done(Calibration {
                goal: self.goal,
                duration: measurement.duration,
                interval: measurement.interval,
                setting: measurement.setting,
                rounds: self.rounds,
                converged: true,
            }));
        }

        if self.rounds == 1 && measurement.duration > self.goal + FLOOR_MARGIN_NANOS {
            return Err(CalibrationError::FloorTooHigh {
                floor: measurement.duration,
                goal: self.goal,
            });
        }

        if self.rounds >= ROUND_BUDGET {
            return Err(CalibrationError::NonConvergence {
                rounds: self.rounds,
                goal: self.goal,
                duration: measurement.duration,
            });
        }

        let next = match SEED_ITERATIONS.get(self.rounds) {
            Some(&seed) => seed,
            None => self.next_iterations(),
        };
        Ok(CalibrationStep::Measure(self.setting(next)))
    }
}
