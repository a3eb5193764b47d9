//! ADPF Hint Session Core
//!
//! Contains the building blocks of the frame pipeline:
//! - Single-consumer event loops (one worker thread each)
//! - Physics bodies and the N-body integrator
//! - Monotonic time and deterministic math
//! - Per-frame value types passed between pipeline stages

pub mod event_loop;
pub mod frame;
pub mod math;
pub mod model;
pub mod time;
pub mod vsync;

pub use glam;

pub use event_loop::{EventLoop, LoopHandle, WorkerId};
pub use frame::{StackState, StageState};
pub use model::{Mesh, Model, Vertex};
pub use vsync::{Vsync, VsyncData};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
