//! Renderer: owns the stage loops and the draw loop, drives batches of frames

use crate::choreographer::Choreographer;
use crate::hint::{HintState, PerformanceHintManager};
use crate::pipeline::{lock, DrawState, FramePipeline, FrameState, DRAW_STATE};
use crate::surface::{physics_bounds, DurationOracle, SurfaceFactory};
use crate::RenderError;
use adpf_core::event_loop::current_thread_id;
use adpf_core::math::DeterministicRng;
use adpf_core::model::HEAD_HALF_EXTENT;
use adpf_core::time::now_nanos;
use adpf_core::{EventLoop, Mesh, Model, StageState, WorkerId};
use adpf_metrics::stats::serialize_values;
use adpf_metrics::{FrameBatchData, FrameStats, ResultSink};
use glam::Vec3;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long one pump of the platform loop may block.
const POLL_TIMEOUT: Duration = Duration::from_millis(30);

/// Only one synchronous draw may run per process: the vsync callback chain is unique.
static SYNC_DRAW: Mutex<()> = Mutex::new(());

/// Everything needed to build a [`Renderer`].
pub struct RendererOptions {
    pub stages: usize,
    pub heads_per_stage: usize,
    /// Seed for head placement.
    pub seed: u64,
    /// Also record raw per-frame durations and intervals for named batches.
    pub verbose: bool,
    pub drawing_timeout: Duration,
    pub surface: SurfaceFactory,
    pub choreographer: Arc<dyn Choreographer>,
    pub hint_manager: Arc<dyn PerformanceHintManager>,
    pub duration_oracle: Option<Box<dyn DurationOracle>>,
}

impl RendererOptions {
    pub fn new(
        surface: SurfaceFactory,
        choreographer: Arc<dyn Choreographer>,
        hint_manager: Arc<dyn PerformanceHintManager>,
    ) -> Self {
        Self {
            stages: 3,
            heads_per_stage: 4,
            seed: 1,
            verbose: true,
            drawing_timeout: Duration::from_secs(30),
            surface,
            choreographer,
            hint_manager,
            duration_oracle: None,
        }
    }

    pub fn with_stages(mut self, stages: usize) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_heads_per_stage(mut self, heads: usize) -> Self {
        self.heads_per_stage = heads;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_drawing_timeout(mut self, timeout: Duration) -> Self {
        self.drawing_timeout = timeout;
        self
    }

    pub fn with_duration_oracle(mut self, oracle: Box<dyn DurationOracle>) -> Self {
        self.duration_oracle = Some(oracle);
        self
    }
}

/// Frame pipeline driver.
///
/// The surface is created on the draw loop and only ever touched there. All
/// other state is shared with the loops through an internal pipeline object.
pub struct Renderer {
    pipeline: Arc<FramePipeline>,
    stage_loops: Vec<EventLoop>,
    draw_loop: EventLoop,
    thread_ids: Vec<WorkerId>,
    mesh: Arc<Mesh>,
    rng: DeterministicRng,
    num_heads: usize,
    verbose: bool,
    drawing_timeout: Duration,
}

impl Renderer {
    /// Start the stage and draw loops and initialize the surface on the draw loop.
    ///
    /// Blocks until the surface is ready.
    pub fn new(options: RendererOptions) -> Result<Self, RenderError> {
        if options.stages == 0 {
            return Err(RenderError::NoStages);
        }

        let spawn = |name: String| {
            EventLoop::new(&name).map_err(|source| RenderError::Spawn { name, source })
        };
        let stage_loops = (0..options.stages)
            .map(|level| spawn(format!("stage-{level}")))
            .collect::<Result<Vec<_>, _>>()?;
        let draw_loop = spawn("draw".to_string())?;

        let size = init_surface(&draw_loop, options.surface, options.duration_oracle)?;
        tracing::info!(width = size.0, height = size.1, stages = options.stages, "surface ready");

        let pipeline = Arc::new(FramePipeline {
            stages: stage_loops.iter().map(EventLoop::handle).collect(),
            draw: draw_loop.handle(),
            latest: (0..options.stages)
                .map(|_| Mutex::new(StageState::default()))
                .collect(),
            bounds: Mutex::new(physics_bounds(size.0, size.1)),
            physics_iterations: AtomicU32::new(1),
            frame: Mutex::new(FrameState::default()),
            hint: Mutex::new(HintState::default()),
            hint_manager: options.hint_manager,
            choreographer: options.choreographer,
            results: ResultSink::new(),
        });

        let mut thread_ids: Vec<WorkerId> = stage_loops.iter().map(EventLoop::worker_id).collect();
        thread_ids.push(draw_loop.worker_id());

        let mut renderer = Self {
            pipeline,
            stage_loops,
            draw_loop,
            thread_ids,
            mesh: Arc::new(Mesh::quad(HEAD_HALF_EXTENT)),
            rng: DeterministicRng::new(options.seed),
            num_heads: 0,
            verbose: options.verbose,
            drawing_timeout: options.drawing_timeout,
        };
        renderer.set_num_heads(options.stages * options.heads_per_stage);
        Ok(renderer)
    }

    /// Thread ids of every stage loop followed by the draw loop.
    pub fn thread_ids(&self) -> &[WorkerId] {
        &self.thread_ids
    }

    pub fn stage_count(&self) -> usize {
        self.stage_loops.len()
    }

    pub fn draw_thread_id(&self) -> WorkerId {
        self.draw_loop.worker_id()
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Replace every head with `heads` freshly placed ones, spread across the stages.
    pub fn set_num_heads(&mut self, heads: usize) {
        let stages = self.stage_loops.len();
        let rng = &mut self.rng;
        let mut id = 0;
        for (level, latest) in self.pipeline.latest.iter().enumerate() {
            let count = heads / stages + usize::from(level < heads % stages);
            let models = (0..count)
                .map(|_| {
                    id += 1;
                    let mut head = Model::new(Arc::clone(&self.mesh));
                    head.translate(Vec3::new(
                        rng.range_f32(-0.75, 0.75),
                        rng.range_f32(-1.5, 1.5),
                        0.0,
                    ));
                    head.set_rotation_offset(TAU * rng.next_f32());
                    head.set_mass((rng.below(10) + 1) as f32);
                    head.set_id(id);
                    head
                })
                .collect();
            *lock(latest) = StageState::new(now_nanos(), models);
        }
        self.num_heads = heads;
        tracing::debug!(heads, "heads placed");
    }

    /// Physics passes per stage update; the main lever on CPU cost.
    pub fn set_physics_iterations(&self, iterations: u32) {
        self.pipeline
            .physics_iterations
            .store(iterations, Ordering::Relaxed);
    }

    pub fn physics_iterations(&self) -> u32 {
        self.pipeline.physics_iterations.load(Ordering::Relaxed)
    }

    /// Try to open a hint session over the pipeline threads and the calling
    /// thread. Returns whether hint sessions are supported.
    ///
    /// With a session already running, only its target changes.
    pub fn start_hint_session(&self, target: i64) -> bool {
        let preferred_rate = self.pipeline.hint_manager.preferred_update_rate_nanos();
        self.add_result("preferredRate", preferred_rate.to_string());

        if self.is_hint_session_running() {
            self.update_target_work_duration(target);
        }

        let mut hint = lock(&self.pipeline.hint);
        hint.last_target = target;
        if preferred_rate > 0 && hint.session.is_none() {
            let mut thread_ids = self.thread_ids.clone();
            thread_ids.push(current_thread_id());
            hint.session = self
                .pipeline
                .hint_manager
                .create_session(&thread_ids, target);
        }
        let supported = preferred_rate > 0 && hint.session.is_some();
        drop(hint);

        self.add_result("isHintSessionSupported", supported.to_string());
        tracing::info!(supported, preferred_rate, target, "hint session");
        supported
    }

    pub fn close_hint_session(&self) {
        let session = lock(&self.pipeline.hint).session.take();
        if let Some(mut session) = session {
            session.close();
            tracing::info!("hint session closed");
        }
    }

    pub fn is_hint_session_running(&self) -> bool {
        lock(&self.pipeline.hint).session.is_some()
    }

    /// Last requested target, whether or not a session is running.
    pub fn target_work_duration(&self) -> i64 {
        lock(&self.pipeline.hint).last_target
    }

    pub fn update_target_work_duration(&self, target: i64) {
        let result = {
            let mut hint = lock(&self.pipeline.hint);
            hint.last_target = target;
            match hint.session.as_mut() {
                Some(session) => session.update_target_work_duration(target),
                None => return,
            }
        };
        if let Err(err) = result {
            self.set_failure(&format!(
                "Failed to update target duration with code {}",
                err.code
            ));
        }
    }

    /// No-op when no session is running.
    pub fn report_actual_work_duration(&self, duration: i64) {
        self.pipeline.report_actual_work_duration(duration);
    }

    /// Median of the baseline run, the reference for efficiency.
    pub fn set_baseline_median(&self, median: i64) {
        lock(&self.pipeline.hint).baseline_median = median;
    }

    pub fn add_result(&self, name: impl Into<String>, value: impl Into<String>) {
        self.pipeline.results.add(name, value);
    }

    pub fn set_failure(&self, message: &str) {
        self.pipeline.results.set_failure(message);
    }

    pub fn results(&self) -> &ResultSink {
        &self.pipeline.results
    }

    /// Draw `frames` frames through the full pipeline and return their statistics.
    ///
    /// Blocks the calling thread, pumping the platform loop so vsync callbacks
    /// can fire, until the last frame has been drawn. A named batch writes its
    /// statistics into the results.
    pub fn draw_frames_sync(
        &self,
        frames: usize,
        test_name: Option<&str>,
    ) -> Result<FrameStats, RenderError> {
        let _single_flight = SYNC_DRAW.lock().unwrap_or_else(PoisonError::into_inner);
        let frames = frames.max(1);

        let (done_tx, done_rx) = mpsc::channel();
        let generation = self.pipeline.begin_batch(frames, done_tx);
        self.pipeline.post_callback(generation);

        let deadline = Instant::now() + self.drawing_timeout;
        loop {
            self.pipeline.choreographer.poll_once(POLL_TIMEOUT);
            match done_rx.try_recv() {
                Ok(()) => break,
                Err(TryRecvError::Disconnected) => {
                    self.pipeline.abandon_batch();
                    return Err(RenderError::DrawLoopGone);
                }
                Err(TryRecvError::Empty) => {}
            }
            if Instant::now() >= deadline {
                self.pipeline.abandon_batch();
                tracing::warn!(frames, test = test_name.unwrap_or("unnamed"), "drawing timed out");
                return Err(RenderError::Timeout {
                    frames,
                    timeout: self.drawing_timeout,
                });
            }
        }

        let batch = self.pipeline.take_batch();
        if let Some(name) = test_name {
            if self.verbose {
                self.add_result(format!("{name}_durations"), serialize_values(&batch.durations));
                self.add_result(format!("{name}_intervals"), serialize_values(&batch.intervals));
            }
        }
        Ok(self.frame_stats(&batch, test_name))
    }

    /// Reduce a batch to statistics, recording them when the batch is named.
    pub fn frame_stats(&self, batch: &FrameBatchData, test_name: Option<&str>) -> FrameStats {
        let stats = FrameStats::compute(batch, self.pipeline.session_snapshot());
        if let Some(name) = test_name {
            stats.record(name, batch, self.results());
            stats.dump(name);
        }
        stats
    }

    /// Run a few frames and return the deadline offsets the display offers.
    pub fn find_vsync_targets(&self, frames: usize) -> Result<Vec<i64>, RenderError> {
        lock(&self.pipeline.frame).targets.clear();
        self.draw_frames_sync(frames, Some("findVsyncTargets"))?;
        Ok(lock(&self.pipeline.frame).targets.clone())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.close_hint_session();
        tracing::debug!("renderer shutting down");
    }
}

/// Build the surface on the draw loop and wait for it.
fn init_surface(
    draw_loop: &EventLoop,
    factory: SurfaceFactory,
    oracle: Option<Box<dyn DurationOracle>>,
) -> Result<(u32, u32), RenderError> {
    let (tx, rx) = mpsc::channel();
    draw_loop.enqueue(move || {
        let result = factory().map(|surface| {
            let state = DrawState::new(surface, oracle);
            let size = state.size();
            DRAW_STATE.with(|cell| *cell.borrow_mut() = Some(state));
            size
        });
        let _ = tx.send(result);
    });
    let size = rx.recv().map_err(|_| RenderError::DrawLoopGone)??;
    Ok(size)
}
