//! ADPF Hint Session Runtime
//!
//! Boots the frame pipeline on the simulated platform, calibrates the
//! workload, runs the load tests and prints the result map as JSON.

mod session;

use adpf_core::time::frame_period;
use adpf_metrics::ResultSink;
use adpf_render::sim::{HeadlessSurface, SimChoreographer, SimHintManager};
use adpf_render::{Renderer, RendererOptions};
use adpf_services::Settings;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Candidate timelines offered per vsync callback.
const TIMELINES: usize = 3;

fn main() -> Result<()> {
    // Stdout carries the results.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    tracing::info!("ADPF hint session v{}", adpf_core::VERSION);

    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref()).context("loading settings")?;
    tracing::info!(
        frame_rate = settings.display.frame_rate,
        verbose = settings.logging.verbose,
        calibration = ?settings.run.calibration,
        "settings loaded"
    );

    let mut renderer = build_renderer(&settings).context("starting the renderer")?;

    let outcome = session::run(&mut renderer, &settings);
    if let Err(err) = &outcome {
        if !renderer.results().has_failure() {
            renderer.set_failure(&format!("{err:#}"));
        }
    }
    emit(renderer.results())?;
    outcome
}

fn build_renderer(settings: &Settings) -> Result<Renderer> {
    let period = frame_period(settings.display.frame_rate);
    let (surface, _) = HeadlessSurface::factory(settings.display.width, settings.display.height);
    let options = RendererOptions::new(
        surface,
        Arc::new(SimChoreographer::new(period, TIMELINES)),
        Arc::new(SimHintManager::supported()),
    )
    .with_stages(settings.pipeline.stages)
    .with_heads_per_stage(settings.pipeline.heads_per_stage)
    .with_seed(settings.pipeline.seed)
    .with_verbose(settings.logging.verbose)
    .with_drawing_timeout(settings.run.drawing_timeout());
    Ok(Renderer::new(options)?)
}

fn emit(results: &ResultSink) -> Result<()> {
    let json = serde_json::to_string_pretty(&results.snapshot()).context("serializing results")?;
    println!("{json}");
    Ok(())
}
