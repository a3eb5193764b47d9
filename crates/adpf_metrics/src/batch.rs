//! Accumulator for one measurement batch

use adpf_core::{Vsync, VsyncData};

/// Parallel per-frame sequences collected during one batch.
///
/// `vsyncs` and `selected_vsyncs` grow together in the vsync callback;
/// `durations` grows on the draw thread; `intervals` has one entry less than
/// the callbacks since the first frame has no predecessor.
#[derive(Debug, Clone, Default)]
pub struct FrameBatchData {
    pub durations: Vec<i64>,
    pub intervals: Vec<i64>,
    pub vsyncs: Vec<VsyncData>,
    pub selected_vsyncs: Vec<Vsync>,
}

impl FrameBatchData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.durations.clear();
        self.intervals.clear();
        self.vsyncs.clear();
        self.selected_vsyncs.clear();
    }

    /// For each frame, the chosen deadline measured from that frame's callback time.
    pub fn selected_deadline_durations(&self) -> Vec<i64> {
        self.vsyncs
            .iter()
            .zip(&self.selected_vsyncs)
            .map(|(data, selected)| selected.deadline_nanos - data.frame_time_nanos)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_deadlines_are_relative() {
        let mut batch = FrameBatchData::new();
        for (frame_time, deadline) in [(100, 108), (200, 216)] {
            let vsync = Vsync {
                deadline_nanos: deadline,
                ..Vsync::default()
            };
            batch.vsyncs.push(VsyncData {
                frame_time_nanos: frame_time,
                preferred_index: 0,
                vsyncs: vec![vsync],
            });
            batch.selected_vsyncs.push(vsync);
        }
        assert_eq!(batch.selected_deadline_durations(), vec![8, 16]);

        batch.clear();
        assert!(batch.vsyncs.is_empty() && batch.selected_vsyncs.is_empty());
    }
}
