//! Snapshots of one Choreographer callback

/// One candidate presentation timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vsync {
    pub index: usize,
    pub deadline_nanos: i64,
    pub presentation_nanos: i64,
    pub vsync_id: i64,
}

/// Everything a vsync callback reported, immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VsyncData {
    pub frame_time_nanos: i64,
    pub preferred_index: usize,
    pub vsyncs: Vec<Vsync>,
}

impl VsyncData {
    pub fn num_vsyncs(&self) -> usize {
        self.vsyncs.len()
    }

    /// Time from the callback's frame time to each candidate deadline.
    pub fn deadline_offsets(&self) -> Vec<i64> {
        self.vsyncs
            .iter()
            .map(|vsync| vsync.deadline_nanos - self.frame_time_nanos)
            .collect()
    }

    /// The timeline whose deadline offset is closest to `target`.
    ///
    /// Ties resolve to the lowest index. `None` only when there are no timelines.
    pub fn closest_to_target(&self, target: i64) -> Option<&Vsync> {
        let mut closest: Option<(&Vsync, i64)> = None;
        for vsync in &self.vsyncs {
            let diff = (vsync.deadline_nanos - self.frame_time_nanos - target).abs();
            match closest {
                Some((_, best)) if diff >= best => {}
                _ => closest = Some((vsync, diff)),
            }
        }
        closest.map(|(vsync, _)| vsync)
    }

    /// Log every timeline at debug level.
    pub fn dump(&self) {
        tracing::debug!(
            frame_time = self.frame_time_nanos,
            num_vsyncs = self.num_vsyncs(),
            preferred = self.preferred_index,
            "vsync callback"
        );
        for vsync in &self.vsyncs {
            tracing::debug!(
                index = vsync.index,
                deadline = vsync.deadline_nanos,
                offset = vsync.deadline_nanos - self.frame_time_nanos,
                vsync_id = vsync.vsync_id,
                "vsync timeline"
            );
        }
    }
}
