//! Task document: the live, mutable entity whose versions become snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ids::{DocumentLink, SnapshotKey, TaskType};
use super::snapshot::{StageSnapshot, TransitionSource};
use super::stage::TaskStage;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCause {
    pub message: String,

    /// Task where the failure originated, when it was propagated from a child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<DocumentLink>,
}

impl FailureCause {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: None,
        }
    }

    pub fn from_origin(message: impl Into<String>, origin: DocumentLink) -> Self {
        Self {
            message: message.into(),
            origin: Some(origin),
        }
    }
}

/// Where a task reports completion: the parent and the parent sub-stages to request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCallback {
    pub parent_link: DocumentLink,
    pub on_finished: String,
    pub on_failed: String,
}

/// Persisted state of one task document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub document_link: DocumentLink,
    pub task_type: TaskType,
    pub stage: TaskStage,
    pub sub_stage: String,

    /// Set only when `stage` is FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_properties: BTreeMap<String, String>,

    /// Ownership / isolation scope.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tenant_links: Vec<String>,

    /// Absolute time (micros) after which the document may be purged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_micros: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<TaskCallback>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_source: Option<TransitionSource>,

    pub payload: serde_json::Value,

    /// Store-assigned, strictly increasing per document.
    #[serde(default)]
    pub version: u64,

    /// Store-assigned, strictly increasing per document.
    #[serde(default)]
    pub update_time_micros: u64,
}

impl TaskDocument {
    pub fn new(
        document_link: DocumentLink,
        task_type: TaskType,
        sub_stage: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            document_link,
            task_type,
            stage: TaskStage::Created,
            sub_stage: sub_stage.into(),
            failure: None,
            custom_properties: BTreeMap::new(),
            tenant_links: Vec::new(),
            expiration_micros: None,
            callback: None,
            transition_source: None,
            payload,
            version: 0,
            update_time_micros: 0,
        }
    }

    pub fn snapshot_key(&self) -> SnapshotKey {
        SnapshotKey::new(&self.document_link, &self.sub_stage, self.update_time_micros)
    }

    /// Snapshot of this version, as the store exposes it.
    pub fn to_snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            document_link: self.document_link.clone(),
            task_type: self.task_type.clone(),
            stage: self.stage,
            sub_stage: self.sub_stage.clone(),
            update_time_micros: self.update_time_micros,
            version: self.version,
            payload: self.payload.clone(),
            failure: self.failure.clone(),
            custom_properties: self.custom_properties.clone(),
            transition_source: self.transition_source.clone(),
        }
    }

    pub fn is_expired(&self, now_micros: u64) -> bool {
        self.expiration_micros
            .map(|expires| expires <= now_micros)
            .unwrap_or(false)
    }
}

/// A requested `(stage, sub_stage)` transition plus the fields it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct StagePatch {
    pub stage: TaskStage,
    pub sub_stage: String,

    /// JSON object merged into the payload; `null` fields are skipped.
    pub payload: serde_json::Value,

    pub failure: Option<FailureCause>,
    pub custom_properties: BTreeMap<String, String>,

    /// Cause of this transition. Defaults to the version being patched.
    pub transition_source: Option<TransitionSource>,
}

impl StagePatch {
    pub fn new(stage: TaskStage, sub_stage: impl Into<String>) -> Self {
        Self {
            stage,
            sub_stage: sub_stage.into(),
            payload: serde_json::Value::Null,
            failure: None,
            custom_properties: BTreeMap::new(),
            transition_source: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_failure(mut self, failure: FailureCause) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_source(mut self, source: TransitionSource) -> Self {
        self.transition_source = Some(source);
        self
    }

    pub fn with_custom_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.custom_properties = properties;
        self
    }
}
