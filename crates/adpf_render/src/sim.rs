//! Platform stand-ins that run anywhere
//!
//! [`SimChoreographer`] ticks on a fixed refresh grid, [`SimHintManager`]
//! records every hint call, [`HeadlessSurface`] walks the frame's vertices
//! without a display and [`ScriptedDurations`] replaces measured frame time
//! with a fixed sequence.

use crate::choreographer::{Choreographer, VsyncCallback};
use crate::hint::{HintError, PerformanceHintManager, PerformanceHintSession};
use crate::pipeline::lock;
use crate::surface::{DrawSurface, DurationOracle, SurfaceError, SurfaceFactory};
use adpf_core::time::{now_nanos, to_nanos, NANOS_PER_MILLI};
use adpf_core::{StackState, Vertex, Vsync, VsyncData, WorkerId};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Vsync source on a fixed period, aligned to the process time epoch.
pub struct SimChoreographer {
    period: i64,
    timelines: usize,
    pending: Mutex<Vec<VsyncCallback>>,
    last_tick: AtomicI64,
}

impl SimChoreographer {
    /// `timelines` candidate deadlines are offered per callback, at least one.
    pub fn new(period: Duration, timelines: usize) -> Self {
        Self {
            period: to_nanos(period).max(1),
            timelines: timelines.max(1),
            pending: Mutex::new(Vec::new()),
            last_tick: AtomicI64::new(0),
        }
    }

    /// 60Hz with three timelines.
    pub fn sixty_hz() -> Self {
        Self::new(Duration::from_nanos(16_666_667), 3)
    }

    pub fn period_nanos(&self) -> i64 {
        self.period
    }

    /// Callback payload for tick number `tick` at `frame_time`. Every timeline
    /// of every tick gets its own vsync id.
    pub fn vsync_data(&self, frame_time: i64, tick: i64) -> VsyncData {
        let first_id = tick * self.timelines as i64;
        let vsyncs = (0..self.timelines)
            .map(|index| {
                let presentation = frame_time + (index as i64 + 1) * self.period;
                Vsync {
                    index,
                    deadline_nanos: presentation - self.period / 5,
                    presentation_nanos: presentation,
                    vsync_id: first_id + index as i64,
                }
            })
            .collect();
        VsyncData {
            frame_time_nanos: frame_time,
            preferred_index: 1.min(self.timelines - 1),
            vsyncs,
        }
    }

    fn next_tick(&self, now: i64) -> i64 {
        let tick = (now / self.period + 1) * self.period;
        tick.max(self.last_tick.load(Ordering::Relaxed) + self.period)
    }
}

impl Choreographer for SimChoreographer {
    fn post_vsync_callback(&self, callback: VsyncCallback) {
        lock(&self.pending).push(callback);
    }

    fn poll_once(&self, timeout: Duration) {
        let now = now_nanos();
        let tick = self.next_tick(now);
        let wait = tick - now;
        if wait > to_nanos(timeout) {
            thread::sleep(timeout);
            return;
        }
        thread::sleep(Duration::from_nanos(wait.max(0) as u64));
        self.last_tick.store(tick, Ordering::Relaxed);

        // Callbacks posted from inside a callback wait for the next tick.
        let due = std::mem::take(&mut *lock(&self.pending));
        if due.is_empty() {
            return;
        }
        let data = self.vsync_data(tick, tick / self.period);
        for callback in due {
            callback(data.clone());
        }
    }
}

/// One recorded hint call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintCall {
    CreateSession { threads: Vec<WorkerId>, target: i64 },
    UpdateTarget(i64),
    ReportActual(i64),
    Close,
}

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Supported,
    Unsupported,
    Refusing,
    FailingReports(i32),
}

/// Hint manager that records calls instead of talking to the power HAL.
#[derive(Clone)]
pub struct SimHintManager {
    behavior: Behavior,
    calls: Arc<Mutex<Vec<HintCall>>>,
}

impl SimHintManager {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn supported() -> Self {
        Self::with_behavior(Behavior::Supported)
    }

    /// Preferred rate is negative, as on devices without hint support.
    pub fn unsupported() -> Self {
        Self::with_behavior(Behavior::Unsupported)
    }

    /// Positive rate, but session creation fails.
    pub fn refusing() -> Self {
        Self::with_behavior(Behavior::Refusing)
    }

    /// Sessions open, but every report fails with `code`.
    pub fn failing_reports(code: i32) -> Self {
        Self::with_behavior(Behavior::FailingReports(code))
    }

    pub fn calls(&self) -> Vec<HintCall> {
        lock(&self.calls).clone()
    }

    pub fn reported(&self) -> Vec<i64> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                HintCall::ReportActual(duration) => Some(*duration),
                _ => None,
            })
            .collect()
    }
}

impl PerformanceHintManager for SimHintManager {
    fn preferred_update_rate_nanos(&self) -> i64 {
        match self.behavior {
            Behavior::Unsupported => -1,
            _ => 100 * NANOS_PER_MILLI,
        }
    }

    fn create_session(
        &self,
        thread_ids: &[WorkerId],
        target_nanos: i64,
    ) -> Option<Box<dyn PerformanceHintSession>> {
        match self.behavior {
            Behavior::Unsupported | Behavior::Refusing => return None,
            Behavior::Supported | Behavior::FailingReports(_) => {}
        }
        lock(&self.calls).push(HintCall::CreateSession {
            threads: thread_ids.to_vec(),
            target: target_nanos,
        });
        let report_failure = match self.behavior {
            Behavior::FailingReports(code) => Some(code),
            _ => None,
        };
        Some(Box::new(SimHintSession {
            calls: Arc::clone(&self.calls),
            report_failure,
        }))
    }
}

pub struct SimHintSession {
    calls: Arc<Mutex<Vec<HintCall>>>,
    report_failure: Option<i32>,
}

impl PerformanceHintSession for SimHintSession {
    fn update_target_work_duration(&mut self, target_nanos: i64) -> Result<(), HintError> {
        lock(&self.calls).push(HintCall::UpdateTarget(target_nanos));
        Ok(())
    }

    fn report_actual_work_duration(&mut self, actual_nanos: i64) -> Result<(), HintError> {
        lock(&self.calls).push(HintCall::ReportActual(actual_nanos));
        match self.report_failure {
            Some(code) => Err(HintError { code }),
            None => Ok(()),
        }
    }

    fn close(&mut self) {
        lock(&self.calls).push(HintCall::Close);
    }
}

/// What a [`HeadlessSurface`] has done so far.
#[derive(Debug, Default)]
pub struct SurfaceCounters {
    pub frames: AtomicUsize,
    pub swaps: AtomicUsize,
    pub models: AtomicUsize,
    /// Vertex bytes that would have been uploaded.
    pub bytes: AtomicUsize,
}

/// Surface without a display.
pub struct HeadlessSurface {
    size: (u32, u32),
    counters: Arc<SurfaceCounters>,
    scratch: Vec<Vertex>,
}

impl HeadlessSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            counters: Arc::new(SurfaceCounters::default()),
            scratch: Vec::new(),
        }
    }

    pub fn counters(&self) -> Arc<SurfaceCounters> {
        Arc::clone(&self.counters)
    }

    /// Factory for the renderer plus a handle on the counters.
    pub fn factory(width: u32, height: u32) -> (SurfaceFactory, Arc<SurfaceCounters>) {
        let surface = Self::new(width, height);
        let counters = surface.counters();
        let factory: SurfaceFactory =
            Box::new(move || Ok(Box::new(surface) as Box<dyn DrawSurface>));
        (factory, counters)
    }
}

impl DrawSurface for HeadlessSurface {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn render(&mut self, stack: &StackState) -> Result<(), SurfaceError> {
        self.scratch.clear();
        let mut models = 0;
        for model in stack.models() {
            self.scratch.extend(model.vertices());
            models += 1;
        }
        let bytes: &[u8] = bytemuck::cast_slice(&self.scratch);
        self.counters.bytes.fetch_add(bytes.len(), Ordering::Relaxed);
        self.counters.models.fetch_add(models, Ordering::Relaxed);
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<(), SurfaceError> {
        self.counters.swaps.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Reports a repeating sequence of durations instead of the measured ones.
#[derive(Debug, Clone)]
pub struct ScriptedDurations {
    values: Vec<i64>,
    next: usize,
}

impl ScriptedDurations {
    pub fn new(values: Vec<i64>) -> Self {
        Self { values, next: 0 }
    }
}

impl DurationOracle for ScriptedDurations {
    fn work_duration(&mut self, measured_nanos: i64) -> i64 {
        if self.values.is_empty() {
            return measured_nanos;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_precede_presentation() {
        let choreographer = SimChoreographer::new(Duration::from_millis(10), 3);
        let data = choreographer.vsync_data(1_000, 7);

        assert_eq!(data.num_vsyncs(), 3);
        assert_eq!(data.preferred_index, 1);
        assert_eq!(data.deadline_offsets(), vec![8_000_000, 18_000_000, 28_000_000]);
        for vsync in &data.vsyncs {
            assert!(vsync.deadline_nanos < vsync.presentation_nanos);
        }
    }

    #[test]
    fn vsync_ids_never_repeat_across_ticks() {
        let choreographer = SimChoreographer::new(Duration::from_millis(10), 3);
        let ids: Vec<i64> = (40..44)
            .flat_map(|tick| choreographer.vsync_data(tick * 10_000_000, tick).vsyncs)
            .map(|vsync| vsync.vsync_id)
            .collect();

        assert_eq!(ids.len(), 12);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn single_timeline_prefers_index_zero() {
        let choreographer = SimChoreographer::new(Duration::from_millis(10), 1);
        assert_eq!(choreographer.vsync_data(0, 0).preferred_index, 0);
    }

    #[test]
    fn callbacks_fire_once_per_post() {
        let choreographer = SimChoreographer::new(Duration::from_millis(2), 2);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        choreographer.post_vsync_callback(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..5 {
            choreographer.poll_once(Duration::from_millis(30));
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scripted_durations_cycle() {
        let mut oracle = ScriptedDurations::new(vec![1, 2, 3]);
        let seen: Vec<i64> = (0..5).map(|_| oracle.work_duration(99)).collect();
        assert_eq!(seen, vec![1, 2, 3, 1, 2]);
        assert_eq!(ScriptedDurations::new(Vec::new()).work_duration(42), 42);
    }

    #[test]
    fn failing_reports_surface_the_code() {
        let manager = SimHintManager::failing_reports(-22);
        let mut session = manager.create_session(&[1, 2], 5).unwrap();
        assert_eq!(session.report_actual_work_duration(10), Err(HintError { code: -22 }));
        assert_eq!(manager.reported(), vec![10]);
    }

    #[test]
    fn unsupported_manager_opens_nothing() {
        let manager = SimHintManager::unsupported();
        assert!(manager.preferred_update_rate_nanos() < 0);
        assert!(manager.create_session(&[1], 5).is_none());
        assert!(manager.calls().is_empty());
    }
}
