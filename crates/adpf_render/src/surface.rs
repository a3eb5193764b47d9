//! Draw surface seam
//!
//! A surface is created on the draw thread and never leaves it, so
//! implementations may wrap thread-bound GL/EGL state.

use adpf_core::StackState;
use thiserror::Error;

/// Half the height of the orthographic projection: the visible area spans -2 to 2.
pub const PROJECTION_HALF_HEIGHT: f32 = 2.0;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("no display available")]
    NoDisplay,

    #[error("surface setup failed: {0}")]
    Setup(String),

    #[error("draw failed: {0}")]
    Draw(String),

    #[error("buffer swap failed: {0}")]
    Swap(String),
}

pub trait DrawSurface {
    /// Framebuffer size in pixels; checked every frame.
    fn size(&self) -> (u32, u32);

    /// Draw every model of the frame.
    fn render(&mut self, stack: &StackState) -> Result<(), SurfaceError>;

    fn swap_buffers(&mut self) -> Result<(), SurfaceError>;
}

/// Builds the surface on the draw thread.
pub type SurfaceFactory =
    Box<dyn FnOnce() -> Result<Box<dyn DrawSurface>, SurfaceError> + Send + 'static>;

/// Maps the measured CPU span of a frame onto the duration that is recorded
/// and reported. Used to replace real timing with a synthetic source.
pub trait DurationOracle: Send {
    fn work_duration(&mut self, measured_nanos: i64) -> i64;
}

/// Physics region for a framebuffer: projection height 4, width scaled by aspect.
pub fn physics_bounds(width: u32, height: u32) -> (f32, f32) {
    let full_height = PROJECTION_HALF_HEIGHT * 2.0;
    if height == 0 {
        return (full_height, full_height);
    }
    (width as f32 * full_height / height as f32, full_height)
}
