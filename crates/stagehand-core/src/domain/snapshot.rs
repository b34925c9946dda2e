//! Stage snapshots and the backward transition pointers between them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::document::FailureCause;
use super::ids::{DocumentLink, SnapshotKey, TaskType};
use super::stage::TaskStage;

/// Backward pointer from a snapshot to the snapshot that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionSource {
    pub document_link: DocumentLink,
    pub sub_stage: String,
    pub update_time_micros: u64,
}

impl TransitionSource {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(&self.document_link, &self.sub_stage, self.update_time_micros)
    }
}

/// One committed version of one task document.
///
/// Snapshots are never modified after the store exposes them; lineage
/// consumers only read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub document_link: DocumentLink,
    pub task_type: TaskType,
    pub stage: TaskStage,
    pub sub_stage: String,
    pub update_time_micros: u64,
    pub version: u64,

    /// Workflow-specific state; only visitors interpret it.
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_properties: BTreeMap<String, String>,

    /// Absent only for root snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_source: Option<TransitionSource>,
}

impl StageSnapshot {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(&self.document_link, &self.sub_stage, self.update_time_micros)
    }

    /// Pointer that a transition caused by this snapshot should record.
    pub fn as_source(&self) -> TransitionSource {
        TransitionSource {
            document_link: self.document_link.clone(),
            sub_stage: self.sub_stage.clone(),
            update_time_micros: self.update_time_micros,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Read a payload field, if present and non-null.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name).filter(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(sub_stage: &str, micros: u64) -> StageSnapshot {
        StageSnapshot {
            document_link: DocumentLink::new("/requests/r1"),
            task_type: TaskType::new("request-broker"),
            stage: TaskStage::Started,
            sub_stage: sub_stage.to_string(),
            update_time_micros: micros,
            version: 1,
            payload: json!({ "resourceType": "CONTAINER", "resourceLinks": null }),
            failure: None,
            custom_properties: BTreeMap::new(),
            transition_source: None,
        }
    }

    #[test]
    fn source_key_matches_snapshot_key() {
        let s = snapshot("RESERVING", 10);
        assert_eq!(s.as_source().key(), s.key());
    }

    #[test]
    fn null_fields_read_as_absent() {
        let s = snapshot("CREATED", 1);
        assert_eq!(s.field("resourceType"), Some(&json!("CONTAINER")));
        assert!(s.field("resourceLinks").is_none());
        assert!(s.field("missing").is_none());
    }
}
