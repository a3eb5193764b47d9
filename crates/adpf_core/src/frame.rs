//! Per-frame pipeline state, moved between stages by value

use crate::model::Model;
use crate::vsync::Vsync;

/// Output of one stage's update: its timing window and the bodies it owns.
#[derive(Debug, Clone, Default)]
pub struct StageState {
    pub start: i64,
    pub end: i64,
    pub models: Vec<Model>,
}

impl StageState {
    pub fn new(start: i64, models: Vec<Model>) -> Self {
        Self {
            start,
            end: start,
            models,
        }
    }

    /// Time the stage spent updating.
    pub fn elapsed(&self) -> i64 {
        self.end - self.start
    }
}

/// The whole pipeline's state for one frame.
#[derive(Debug, Clone, Default)]
pub struct StackState {
    pub intended_vsync: Vsync,
    pub stages: Vec<StageState>,
}

impl StackState {
    /// Empty stages that the pipeline fills in from the top down.
    pub fn new(intended_vsync: Vsync, stage_count: usize) -> Self {
        Self {
            intended_vsync,
            stages: vec![StageState::default(); stage_count],
        }
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.stages.iter().flat_map(|stage| stage.models.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mesh;
    use std::sync::Arc;

    #[test]
    fn stack_iterates_all_stage_models() {
        let mesh = Arc::new(Mesh::quad(0.3));
        let mut stack = StackState::new(Vsync::default(), 3);
        stack.stages[0] = StageState::new(5, vec![Model::new(Arc::clone(&mesh))]);
        stack.stages[2] = StageState::new(5, vec![Model::new(Arc::clone(&mesh)); 2]);

        assert_eq!(stack.models().count(), 3);
        assert_eq!(stack.stages[0].elapsed(), 0);
    }
}
