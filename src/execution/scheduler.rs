//! Execution scheduler - decides which stages run and in what order

use crate::core::{Pipeline, RunContext, Stage};

/// Stage ordering and skip rules
///
/// Stages run strictly in declared order, one at a time. A stage is skipped
/// when every output it declares was already produced earlier in the same
/// invocation; nothing carries over between invocations.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    /// Restrict the run to these stage ids, in declared order
    only: Option<Vec<String>>,
}

impl ExecutionScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run only the named stages
    pub fn only(stage_ids: Vec<String>) -> Self {
        Self {
            only: Some(stage_ids),
        }
    }

    /// Stages to attempt, in execution order
    pub fn plan<'a>(&self, pipeline: &'a Pipeline) -> Vec<&'a Stage> {
        pipeline
            .stages()
            .iter()
            .filter(|stage| match &self.only {
                Some(ids) => ids.iter().any(|id| id == &stage.id),
                None => true,
            })
            .collect()
    }

    /// Why a stage should be skipped, if it should
    pub fn skip_reason(&self, stage: &Stage, ctx: &RunContext) -> Option<String> {
        if stage.outputs.is_empty() {
            return None;
        }
        if stage.outputs.iter().all(|a| ctx.was_produced(&a.name)) {
            Some(format!(
                "outputs already produced in this run: {}",
                stage.output_names().join(", ")
            ))
        } else {
            None
        }
    }
}
