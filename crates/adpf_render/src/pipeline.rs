//! Stage scheduler and draw thread state
//!
//! A frame moves through the pipeline as a [`FrameJob`]. The vsync callback
//! creates the job and enqueues it on the highest stage; each stage updates
//! its bodies, stores the result as the starting point for its next frame,
//! and hands the job to the stage below. Stage 0 hands it to the draw loop.
//! Stage N of frame F therefore overlaps stage N-1 of frame F-1 and the draw
//! of frame F-2.

use crate::choreographer::Choreographer;
use crate::hint::{HintState, PerformanceHintManager};
use crate::surface::{physics_bounds, DrawSurface, DurationOracle};
use adpf_core::time::{now_nanos, NANOS_PER_SECOND};
use adpf_core::{LoopHandle, Model, StackState, StageState, VsyncData};
use adpf_metrics::{FrameBatchData, ResultSink, SessionSnapshot};
use std::cell::RefCell;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One full turn of a head takes this long.
const SPIN_PERIOD_NANOS: f64 = 2.0 * NANOS_PER_SECOND as f64;

/// Integrator sub-step per physics iteration.
const PHYSICS_STEP: f32 = 0.1;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A frame in flight.
pub(crate) struct FrameJob {
    stack: StackState,
    start: i64,
    batch: u64,
    last: bool,
}

/// Bookkeeping for the batch being drawn.
#[derive(Default)]
pub(crate) struct FrameState {
    pub(crate) batch: FrameBatchData,
    pub(crate) generation: u64,
    pub(crate) active: bool,
    pub(crate) frames_remaining: usize,
    pub(crate) last_start: Option<i64>,
    pub(crate) targets: Vec<i64>,
    pub(crate) done: Option<Sender<()>>,
}

/// State shared by the driver thread, the stage loops and the draw loop.
pub(crate) struct FramePipeline {
    pub(crate) stages: Vec<LoopHandle>,
    pub(crate) draw: LoopHandle,
    pub(crate) latest: Vec<Mutex<StageState>>,
    pub(crate) bounds: Mutex<(f32, f32)>,
    pub(crate) physics_iterations: AtomicU32,
    pub(crate) frame: Mutex<FrameState>,
    pub(crate) hint: Mutex<HintState>,
    pub(crate) hint_manager: Arc<dyn PerformanceHintManager>,
    pub(crate) choreographer: Arc<dyn Choreographer>,
    pub(crate) results: ResultSink,
}

impl FramePipeline {
    /// Start a new batch of `frames` frames; `done` fires after the last draw.
    /// Returns the batch generation.
    pub(crate) fn begin_batch(&self, frames: usize, done: Sender<()>) -> u64 {
        let mut frame = lock(&self.frame);
        frame.batch.clear();
        frame.generation += 1;
        frame.active = true;
        frame.frames_remaining = frames;
        frame.last_start = None;
        frame.done = Some(done);
        frame.generation
    }

    /// Stop accepting callbacks for the current batch.
    pub(crate) fn abandon_batch(&self) {
        let mut frame = lock(&self.frame);
        frame.active = false;
        frame.frames_remaining = 0;
        frame.done = None;
    }

    pub(crate) fn take_batch(&self) -> FrameBatchData {
        std::mem::take(&mut lock(&self.frame).batch)
    }

    pub(crate) fn session_snapshot(&self) -> SessionSnapshot {
        let hint = lock(&self.hint);
        SessionSnapshot {
            running: hint.session.is_some(),
            target: hint.last_target,
            baseline_median: hint.baseline_median,
        }
    }

    /// Ask for the next vsync on behalf of batch `generation`.
    pub(crate) fn post_callback(self: &Arc<Self>, generation: u64) {
        let pipeline = Arc::downgrade(self);
        self.choreographer.post_vsync_callback(Box::new(move |data| {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.on_vsync(generation, data);
            }
        }));
    }

    /// A callback left pending by an abandoned batch neither counts a frame
    /// nor posts a successor.
    fn on_vsync(self: &Arc<Self>, generation: u64, data: VsyncData) {
        let start = now_nanos();
        let target = lock(&self.hint).last_target;

        let (job, post_next) = {
            let mut frame = lock(&self.frame);
            if !frame.active || frame.generation != generation {
                return;
            }
            frame.frames_remaining = frame.frames_remaining.saturating_sub(1);
            let remaining = frame.frames_remaining;

            if remaining == 0 && frame.targets.is_empty() {
                data.dump();
                frame.targets = data.deadline_offsets();
            }

            if let Some(last_start) = frame.last_start {
                frame.batch.intervals.push(start - last_start);
            }
            frame.last_start = Some(start);

            let intended = data.closest_to_target(target).copied().unwrap_or_default();
            frame.batch.selected_vsyncs.push(intended);
            frame.batch.vsyncs.push(data);

            if remaining == 0 {
                frame.active = false;
            }

            let job = FrameJob {
                stack: StackState::new(intended, self.stages.len()),
                start,
                batch: frame.generation,
                last: remaining == 0,
            };
            (job, remaining > 0)
        };

        if post_next {
            self.post_callback(generation);
        }
        self.schedule_stage(self.stages.len() - 1, job);
    }

    fn schedule_stage(self: &Arc<Self>, level: usize, job: FrameJob) {
        let pipeline = Arc::clone(self);
        self.stages[level].enqueue(move || pipeline.run_stage(level, job));
    }

    fn run_stage(self: &Arc<Self>, level: usize, mut job: FrameJob) {
        let next = {
            let mut latest = lock(&self.latest[level]);
            let next = self.update_models(&latest);
            *latest = next.clone();
            next
        };
        job.stack.stages[level] = next;

        match level.checked_sub(1) {
            Some(lower) => self.schedule_stage(lower, job),
            None => {
                let pipeline = Arc::clone(self);
                self.draw.enqueue(move || pipeline.draw_frame(job));
            }
        }
    }

    /// Spin and integrate one stage's bodies, starting from its previous output.
    pub(crate) fn update_models(&self, last: &StageState) -> StageState {
        let bounds = *lock(&self.bounds);
        advance_stage(last, self.physics_iterations.load(Ordering::Relaxed), bounds)
    }

    fn draw_frame(&self, job: FrameJob) {
        let drawn = DRAW_STATE.with(|cell| {
            let mut state = cell.borrow_mut();
            let Some(draw) = state.as_mut() else {
                tracing::error!("draw job ran before the surface was initialized");
                return false;
            };

            if let Some((width, height)) = draw.update_render_area() {
                *lock(&self.bounds) = physics_bounds(width, height);
            }

            if let Err(err) = draw.surface.render(&job.stack) {
                self.results.set_failure(&format!("Failed to render frame: {err}"));
            }

            let measured = now_nanos() - job.start;
            let duration = match draw.oracle.as_mut() {
                Some(oracle) => oracle.work_duration(measured),
                None => measured,
            };
            self.record_duration(job.batch, duration);

            if let Err(err) = draw.surface.swap_buffers() {
                self.results.set_failure(&format!("Failed to swap buffers: {err}"));
            }
            true
        });

        if drawn && job.last {
            let mut frame = lock(&self.frame);
            if frame.generation == job.batch {
                if let Some(done) = frame.done.take() {
                    let _ = done.send(());
                }
            }
        }
    }

    fn record_duration(&self, batch: u64, duration: i64) {
        {
            let mut frame = lock(&self.frame);
            if frame.generation != batch {
                return;
            }
            frame.batch.durations.push(duration);
        }
        self.report_actual_work_duration(duration);
    }

    /// No-op without a running session.
    pub(crate) fn report_actual_work_duration(&self, duration: i64) {
        let result = match lock(&self.hint).session.as_mut() {
            Some(session) => session.report_actual_work_duration(duration),
            None => return,
        };
        if let Err(err) = result {
            self.results.set_failure(&format!(
                "Failed to report actual work duration with code {}",
                err.code
            ));
        }
    }
}

/// Next state of a stage: spin proportional to the time since `last` started,
/// then `iterations` physics steps inside `bounds`.
pub(crate) fn advance_stage(last: &StageState, iterations: u32, bounds: (f32, f32)) -> StageState {
    let mut output = StageState::new(now_nanos(), last.models.clone());

    let angle = spin_angle(output.start - last.start);
    for model in &mut output.models {
        model.add_rotation(angle);
    }

    let (width, height) = bounds;
    for _ in 0..iterations {
        Model::apply_physics(PHYSICS_STEP, &mut output.models, width, height);
    }

    output.end = now_nanos();
    output
}

fn spin_angle(elapsed: i64) -> f32 {
    (TAU * (elapsed as f64 / SPIN_PERIOD_NANOS)) as f32
}

/// Everything that must only be touched from the draw thread.
pub(crate) struct DrawState {
    surface: Box<dyn DrawSurface>,
    oracle: Option<Box<dyn DurationOracle>>,
    size: (u32, u32),
}

impl DrawState {
    pub(crate) fn new(surface: Box<dyn DrawSurface>, oracle: Option<Box<dyn DurationOracle>>) -> Self {
        let size = surface.size();
        Self {
            surface,
            oracle,
            size,
        }
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        self.size
    }

    /// New size if the framebuffer changed since the last frame.
    fn update_render_area(&mut self) -> Option<(u32, u32)> {
        let size = self.surface.size();
        if size == self.size {
            return None;
        }
        tracing::debug!(width = size.0, height = size.1, "render area changed");
        self.size = size;
        Some(size)
    }
}

thread_local! {
    /// Lives on the draw loop's worker thread for the renderer's lifetime.
    pub(crate) static DRAW_STATE: RefCell<Option<DrawState>> = const { RefCell::new(None) };
}
