//! Vsync callback seam

use adpf_core::VsyncData;
use std::time::Duration;

/// Runs once, on the thread that pumps the platform loop.
pub type VsyncCallback = Box<dyn FnOnce(VsyncData) + Send + 'static>;

pub trait Choreographer: Send + Sync {
    /// Fire `callback` on the next display refresh.
    fn post_vsync_callback(&self, callback: VsyncCallback);

    /// Pump the platform loop on the calling thread for at most `timeout`,
    /// running any callbacks that come due.
    fn poll_once(&self, timeout: Duration);
}
