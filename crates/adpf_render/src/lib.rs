//! ADPF Render Pipeline
//!
//! Vsync-driven frame pipeline: each Choreographer callback cascades through
//! the physics stages (one worker thread per stage) and ends in a draw job on
//! a dedicated draw thread, which reports the frame's work duration to the
//! performance hint session.
//!
//! The platform (Choreographer, hint sessions, GL surface) is reached through
//! the traits in [`choreographer`], [`hint`] and [`surface`]; [`sim`] provides
//! implementations that run anywhere.

pub mod choreographer;
pub mod hint;
mod pipeline;
mod renderer;
pub mod sim;
pub mod surface;

use std::time::Duration;
use thiserror::Error;

pub use choreographer::{Choreographer, VsyncCallback};
pub use hint::{HintError, PerformanceHintManager, PerformanceHintSession};
pub use renderer::{Renderer, RendererOptions};
pub use surface::{DrawSurface, DurationOracle, SurfaceError, SurfaceFactory};

/// Errors surfaced by the renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("pipeline needs at least one stage")]
    NoStages,

    #[error("failed to start the '{name}' event loop")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("surface setup failed")]
    Surface(#[from] SurfaceError),

    #[error("draw loop is gone")]
    DrawLoopGone,

    #[error("timed out after {timeout:?} waiting for {frames} frames")]
    Timeout { frames: usize, timeout: Duration },
}
