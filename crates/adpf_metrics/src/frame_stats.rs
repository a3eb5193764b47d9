//! Reduction of one batch to the numbers a test run reports

use crate::batch::FrameBatchData;
use crate::results::ResultSink;
use crate::stats::{self, serialize_values};

/// Hint session facts the statistics depend on, captured at reduction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub running: bool,
    /// Last target work duration requested, in nanoseconds.
    pub target: i64,
    /// Median work duration of the baseline run, 0 until measured.
    pub baseline_median: i64,
}

impl SessionSnapshot {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameStats {
    /// Median of the durations
    pub median_work_duration: i64,
    /// Median of the intervals
    pub median_frame_interval: i64,
    /// Sample standard deviation of the durations
    pub deviation: f64,
    /// Frames whose duration exceeded the session target (session only)
    pub exceeded_count: Option<usize>,
    /// Fraction of frames that exceeded the session target (session only)
    pub exceeded_fraction: Option<f64>,
    /// Total duration against `min(target, baseline)` per frame (session only)
    pub efficiency: Option<f64>,
    /// Median of the chosen deadline measured from the callback frame time
    pub median_closest_deadline_to_target: i64,
    /// Target duration the vsync choice aimed at
    pub actual_target_duration: i64,
    pub total_work_duration: f64,
    pub mean_work_duration: f64,
    pub frame_count: usize,
}

impl FrameStats {
    pub fn compute(batch: &FrameBatchData, session: SessionSnapshot) -> Self {
        let durations = &batch.durations;
        let total = stats::sum(durations);
        let frame_count = durations.len();

        let mut out = Self {
            median_work_duration: stats::median(durations),
            median_frame_interval: stats::median(&batch.intervals),
            deviation: stats::sample_deviation(durations),
            median_closest_deadline_to_target: stats::median(
                &batch.selected_deadline_durations(),
            ),
            actual_target_duration: session.target,
            total_work_duration: total,
            mean_work_duration: stats::mean(durations),
            frame_count,
            ..Self::default()
        };

        if session.running {
            let exceeded = durations.iter().filter(|&&d| d > session.target).count();
            out.exceeded_count = Some(exceeded);
            out.exceeded_fraction =
                (frame_count > 0).then(|| exceeded as f64 / frame_count as f64);
            let floor = session.target.min(session.baseline_median);
            out.efficiency =
                (floor > 0 && frame_count > 0).then(|| total / (frame_count as f64 * floor as f64));
        }

        out
    }

    /// Write this batch's statistics under `<test_name>_*` keys.
    pub fn record(&self, test_name: &str, batch: &FrameBatchData, sink: &ResultSink) {
        let key = |suffix: &str| format!("{test_name}_{suffix}");

        sink.add(
            key("selected_deadline_durations"),
            serialize_values(&batch.selected_deadline_durations()),
        );
        sink.add(key("sum"), self.total_work_duration.to_string());
        sink.add(key("num_durations"), self.frame_count.to_string());
        sink.add(key("mean"), self.mean_work_duration.to_string());
        sink.add(key("median"), self.median_work_duration.to_string());
        sink.add(key("median_interval"), self.median_frame_interval.to_string());
        sink.add(
            key("median_deadline_duration"),
            self.median_closest_deadline_to_target.to_string(),
        );
        sink.add(
            key("intended_deadline_duration"),
            self.actual_target_duration.to_string(),
        );
        sink.add(key("deviation"), self.deviation.to_string());

        if let Some(exceeded) = self.exceeded_count {
            sink.add(key("target"), self.actual_target_duration.to_string());
            sink.add(key("target_exceeded_count"), exceeded.to_string());
        }
        if let Some(fraction) = self.exceeded_fraction {
            sink.add(key("target_exceeded_fraction"), fraction.to_string());
        }
        if let Some(efficiency) = self.efficiency {
            sink.add(key("efficiency"), efficiency.to_string());
        }
    }

    pub fn dump(&self, test_name: &str) {
        tracing::info!(
            test = test_name,
            median_work_duration = self.median_work_duration,
            median_frame_interval = self.median_frame_interval,
            deviation = self.deviation,
            exceeded_count = ?self.exceeded_count,
            exceeded_fraction = ?self.exceeded_fraction,
            efficiency = ?self.efficiency,
            median_closest_deadline_to_target = self.median_closest_deadline_to_target,
            actual_target_duration = self.actual_target_duration,
            "frame stats"
        );
    }
}
