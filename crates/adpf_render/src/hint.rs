//! Performance hint session seam
//!
//! A manager that reports a non-positive preferred rate, or refuses to create
//! a session, means hint sessions are unsupported on this device.

use adpf_core::WorkerId;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("hint session call failed with code {code}")]
pub struct HintError {
    pub code: i32,
}

pub trait PerformanceHintManager: Send + Sync {
    fn preferred_update_rate_nanos(&self) -> i64;

    /// Associate `thread_ids` with a target work duration.
    fn create_session(
        &self,
        thread_ids: &[WorkerId],
        target_nanos: i64,
    ) -> Option<Box<dyn PerformanceHintSession>>;
}

pub trait PerformanceHintSession: Send {
    fn update_target_work_duration(&mut self, target_nanos: i64) -> Result<(), HintError>;

    fn report_actual_work_duration(&mut self, actual_nanos: i64) -> Result<(), HintError>;

    fn close(&mut self);
}

/// Session handle plus the last requested target.
#[derive(Default)]
pub(crate) struct HintState {
    pub(crate) session: Option<Box<dyn PerformanceHintSession>>,
    pub(crate) last_target: i64,
    pub(crate) baseline_median: i64,
}
