//! The test sequence run against one renderer

use adpf_calibration::{
    goal_for_interval, run as calibrate_with, Calibration, CalibrationError, JointCalibration,
    RegressionCalibration,
};
use adpf_core::math::DeterministicRng;
use adpf_core::time::{HEAVY_TARGET_NANOS, LIGHT_TARGET_NANOS};
use adpf_metrics::FrameStats;
use adpf_render::Renderer;
use adpf_services::{CalibrationMode, LoadTest, Settings};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::thread;

/// Warm up, calibrate, measure the baseline, then run the load tests in a
/// shuffled order under the hint session.
///
/// Returns early with `Ok` when hint sessions are unsupported.
pub fn run(renderer: &mut Renderer, settings: &Settings) -> Result<()> {
    renderer
        .draw_frames_sync(1, None)
        .context("warm-up frame")?;

    if !renderer.start_hint_session(LIGHT_TARGET_NANOS) {
        tracing::warn!("hint sessions unsupported, skipping load tests");
        return Ok(());
    }

    renderer.set_num_heads(1);
    let stats = renderer
        .draw_frames_sync(settings.run.calibration_samples, None)
        .context("measuring the frame interval")?;
    let interval = stats.median_frame_interval;
    renderer.add_result("median_frame_interval", interval.to_string());
    tracing::info!(interval, goal = goal_for_interval(interval), "frame interval measured");

    let calibration = match calibrate(renderer, settings, interval) {
        Ok(calibration) => calibration,
        Err(err) => {
            renderer.set_failure(&format!("Calibration failed: {err}"));
            return Err(err).context("calibrating the workload");
        }
    };

    let baseline = renderer
        .draw_frames_sync(settings.run.samples, Some("baseline"))
        .context("baseline")?;
    if calibration.duration > 0 {
        let calibrated = calibration.duration as f64;
        let accuracy = 1.0 - (baseline.median_work_duration as f64 - calibrated).abs() / calibrated;
        renderer.add_result("calibration_accuracy", accuracy.to_string());
    }
    renderer.set_baseline_median(baseline.median_work_duration);

    for test in shuffled_tests(settings) {
        tracing::info!(test = test.name(), "running load test");
        run_load_test(renderer, settings, test)
            .with_context(|| format!("load test {}", test.name()))?;
    }

    renderer.close_hint_session();
    Ok(())
}

fn calibrate(
    renderer: &mut Renderer,
    settings: &Settings,
    interval: i64,
) -> Result<Calibration, CalibrationError> {
    let samples = settings.run.calibration_samples;
    match settings.run.calibration {
        CalibrationMode::Regression => {
            let heads = settings.pipeline.stages * settings.pipeline.heads_per_stage;
            let mut state = RegressionCalibration::new(goal_for_interval(interval), heads);
            calibrate_with(renderer, &mut state, samples)
        }
        CalibrationMode::Joint => {
            let mut state = JointCalibration::new(interval);
            calibrate_with(renderer, &mut state, samples)
        }
    }
}

/// Enabled tests, each once, in an order fixed by the shuffle seed.
pub fn shuffled_tests(settings: &Settings) -> Vec<LoadTest> {
    let mut seen = HashSet::new();
    let mut tests = settings.run.tests.clone();
    tests.retain(|test| seen.insert(*test));
    DeterministicRng::new(settings.run.shuffle_seed).shuffle(&mut tests);
    tests
}

fn run_load_test(renderer: &Renderer, settings: &Settings, test: LoadTest) -> Result<()> {
    match test {
        LoadTest::HeavyLoad => {
            draw_with_target(renderer, settings, HEAVY_TARGET_NANOS, test.name())?;
        }
        LoadTest::LightLoad => {
            draw_with_target(renderer, settings, LIGHT_TARGET_NANOS, test.name())?;
        }
        LoadTest::TransitionLoad => {
            let phases = [LIGHT_TARGET_NANOS, HEAVY_TARGET_NANOS, LIGHT_TARGET_NANOS];
            for (phase, target) in phases.into_iter().enumerate() {
                thread::sleep(settings.run.transition_pause());
                let name = format!("{}_{}", test.name(), phase + 1);
                draw_with_target(renderer, settings, target, &name)?;
            }
        }
    }
    Ok(())
}

fn draw_with_target(
    renderer: &Renderer,
    settings: &Settings,
    target: i64,
    name: &str,
) -> Result<FrameStats> {
    renderer.update_target_work_duration(target);
    Ok(renderer.draw_frames_sync(settings.run.samples, Some(name))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adpf_core::time::NANOS_PER_MILLI;
    use adpf_render::sim::{
        HeadlessSurface, HintCall, ScriptedDurations, SimChoreographer, SimHintManager,
    };
    use adpf_render::RendererOptions;
    use std::sync::Arc;
    use std::time::Duration;

    const PERIOD: Duration = Duration::from_millis(4);

    fn quick_settings(mode: CalibrationMode) -> Settings {
        let mut settings = Settings::default();
        settings.run.samples = 6;
        settings.run.calibration_samples = 4;
        settings.run.transition_pause_ms = 0;
        settings.run.calibration = mode;
        settings
    }

    fn renderer(manager: &SimHintManager, durations: Vec<i64>) -> Renderer {
        let (surface, _) = HeadlessSurface::factory(1080, 2400);
        Renderer::new(
            RendererOptions::new(
                surface,
                Arc::new(SimChoreographer::new(PERIOD, 3)),
                Arc::new(manager.clone()),
            )
            .with_duration_oracle(Box::new(ScriptedDurations::new(durations)))
            .with_drawing_timeout(Duration::from_secs(20)),
        )
        .unwrap()
    }

    #[test]
    fn full_sequence_records_every_test() {
        let manager = SimHintManager::supported();
        let mut renderer = renderer(&manager, vec![3 * NANOS_PER_MILLI]);
        let settings = quick_settings(CalibrationMode::Joint);

        run(&mut renderer, &settings).unwrap();

        let results = renderer.results();
        assert_eq!(results.get("isHintSessionSupported").as_deref(), Some("true"));
        for key in [
            "median_frame_interval",
            "goal",
            "physics_iterations",
            "calibration_0_duration",
            "baseline_median",
            "calibration_accuracy",
            "heavy_load_median",
            "heavy_load_target",
            "light_load_median",
            "transition_load_1_median",
            "transition_load_2_median",
            "transition_load_3_median",
        ] {
            assert!(results.get(key).is_some(), "missing {key}");
        }
        assert_eq!(results.get("heavy_load_target"), Some(HEAVY_TARGET_NANOS.to_string()));
        assert!(!results.has_failure());
        assert!(!renderer.is_hint_session_running());
        assert_eq!(manager.calls().last(), Some(&HintCall::Close));
    }

    #[test]
    fn unsupported_device_stops_after_the_probe() {
        let mut renderer = renderer(&SimHintManager::unsupported(), Vec::new());
        run(&mut renderer, &quick_settings(CalibrationMode::Regression)).unwrap();

        let results = renderer.results();
        assert_eq!(results.get("isHintSessionSupported").as_deref(), Some("false"));
        assert!(results.get("median_frame_interval").is_none());
        assert!(!results.has_failure());
    }

    #[test]
    fn calibration_failure_is_recorded() {
        // Durations that ignore the iteration count never converge.
        let mut renderer = renderer(&SimHintManager::supported(), vec![NANOS_PER_MILLI / 2]);
        let err = run(&mut renderer, &quick_settings(CalibrationMode::Regression)).unwrap_err();

        assert!(err.downcast_ref::<CalibrationError>().is_some());
        let failure = renderer.results().get("failure").unwrap();
        assert!(failure.starts_with("Calibration failed"), "{failure}");
        assert!(renderer.results().get("baseline_median").is_none());
    }

    #[test]
    fn shuffle_is_stable_and_deduplicated() {
        let mut settings = Settings::default();
        settings.run.tests = vec![
            LoadTest::LightLoad,
            LoadTest::HeavyLoad,
            LoadTest::LightLoad,
            LoadTest::TransitionLoad,
        ];
        settings.run.shuffle_seed = 9;

        let first = shuffled_tests(&settings);
        assert_eq!(first, shuffled_tests(&settings));
        assert_eq!(first.len(), 3);
        for test in LoadTest::ALL {
            assert!(first.contains(&test));
        }
    }
}
