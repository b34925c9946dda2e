//! Stage transition validation.
//!
//! A patch `(stage', sub')` against the current `(stage, sub)` is judged in
//! this order:
//! 1. unknown `sub'` -> validation error
//! 2. `stage'` and `sub'` disagree -> validation error. FINISHED needs the
//!    COMPLETED sub-stage, FAILED needs ERROR, CANCELLED needs CANCELLED, and
//!    CREATED / STARTED may carry none of the three.
//! 3. current stage terminal: identical -> duplicate, FAILED -> ignored, else illegal
//! 4. `stage'` before `stage` -> illegal
//! 5. identical `(stage, sub)` -> duplicate
//! 6. `sub'` before `sub`: same stage and not transient -> illegal, else ignored
//! 7. apply

use crate::domain::{StagePatch, StageSnapshot, TaskDocument, TaskError, TaskStage};
use crate::typed::SubStageGraph;

/// What the runtime should do with a validated patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Apply,

    /// Already applied (a retried write). No new snapshot.
    Duplicate,

    /// Stale or late patch that is harmless to drop.
    Ignored,
}

/// Result of `TaskRuntime::patch`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(StageSnapshot),
    Duplicate,
    Ignored,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

pub fn check_transition(
    graph: &SubStageGraph,
    current: &TaskDocument,
    patch: &StagePatch,
) -> Result<Verdict, TaskError> {
    let Some(next_pos) = graph.position(&patch.sub_stage) else {
        return Err(TaskError::Validation(format!(
            "unknown sub-stage '{}' for task type '{}'",
            patch.sub_stage, current.task_type
        )));
    };
    check_stage_pairing(graph, patch)?;

    let identical = current.stage == patch.stage && current.sub_stage == patch.sub_stage;
    let illegal = || TaskError::IllegalTransition {
        link: current.document_link.clone(),
        from: describe(current.stage, &current.sub_stage),
        to: describe(patch.stage, &patch.sub_stage),
    };

    if current.stage.is_terminal() {
        if identical {
            return Ok(Verdict::Duplicate);
        }
        if current.stage == TaskStage::Failed {
            return Ok(Verdict::Ignored);
        }
        return Err(illegal());
    }

    if patch.stage.ordinal() < current.stage.ordinal() {
        return Err(illegal());
    }

    if identical {
        return Ok(Verdict::Duplicate);
    }

    // A document carrying a sub-stage its type no longer declares can only move forward.
    let current_pos = graph.position(&current.sub_stage).unwrap_or(0);
    if next_pos < current_pos {
        if current.stage == patch.stage && !graph.is_transient(&patch.sub_stage) {
            return Err(illegal());
        }
        return Ok(Verdict::Ignored);
    }

    Ok(Verdict::Apply)
}

fn check_stage_pairing(graph: &SubStageGraph, patch: &StagePatch) -> Result<(), TaskError> {
    let sub = patch.sub_stage.as_str();
    let consistent = match patch.stage {
        TaskStage::Finished => sub == graph.completed(),
        TaskStage::Failed => sub == graph.error(),
        TaskStage::Cancelled => sub == graph.cancelled(),
        TaskStage::Created | TaskStage::Started => {
            sub != graph.completed() && sub != graph.error() && sub != graph.cancelled()
        }
    };
    if consistent {
        return Ok(());
    }
    Err(TaskError::Validation(format!(
        "sub-stage '{sub}' does not belong to stage {}",
        patch.stage
    )))
}

pub fn describe(stage: TaskStage, sub_stage: &str) -> String {
    format!("{stage}({sub_stage})")
}
