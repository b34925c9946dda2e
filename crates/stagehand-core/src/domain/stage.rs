//! Coarse task lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse lifecycle stage of a task document.
///
/// State transitions:
/// - CREATED -> STARTED -> FINISHED
/// - CREATED -> STARTED -> FAILED
/// - any non-terminal -> CANCELLED
///
/// The declaration order is the ordinal order used to reject backward moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    /// Document persisted, handler not dispatched yet.
    Created,

    /// Sub-stage handlers are running.
    Started,

    /// Completed successfully.
    Finished,

    /// Completed with a recorded failure cause.
    Failed,

    /// Cancelled by a caller.
    Cancelled,
}

impl TaskStage {
    /// Is this a terminal stage (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStage::Finished | TaskStage::Failed | TaskStage::Cancelled
        )
    }

    /// Does a document in this stage still expect handler work?
    pub fn is_active(self) -> bool {
        matches!(self, TaskStage::Created | TaskStage::Started)
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStage::Created => "CREATED",
            TaskStage::Started => "STARTED",
            TaskStage::Finished => "FINISHED",
            TaskStage::Failed => "FAILED",
            TaskStage::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::created(TaskStage::Created, false)]
    #[case::started(TaskStage::Started, false)]
    #[case::finished(TaskStage::Finished, true)]
    #[case::failed(TaskStage::Failed, true)]
    #[case::cancelled(TaskStage::Cancelled, true)]
    fn terminal_stages(#[case] stage: TaskStage, #[case] terminal: bool) {
        assert_eq!(stage.is_terminal(), terminal);
        assert_eq!(stage.is_active(), !terminal);
    }

    #[test]
    fn ordinals_follow_lifecycle() {
        assert!(TaskStage::Created.ordinal() < TaskStage::Started.ordinal());
        assert!(TaskStage::Started.ordinal() < TaskStage::Finished.ordinal());
        assert!(TaskStage::Finished.ordinal() < TaskStage::Failed.ordinal());
        assert!(TaskStage::Failed.ordinal() < TaskStage::Cancelled.ordinal());
    }

    #[test]
    fn stage_serializes_screaming() {
        let s = serde_json::to_string(&TaskStage::Finished).unwrap();
        assert_eq!(s, "\"FINISHED\"");
        assert_eq!(TaskStage::Finished.to_string(), "FINISHED");
    }
}
