//! Domain identifiers.
//!
//! - `TaskType`: the registered kind of a task document (`"request-broker"`, ...).
//! - `DocumentLink`: the stable, globally unique link of one task document.
//! - `SnapshotKey`: identity of one committed version of a document.

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Registered kind of a task document.
///
/// Resolved once when the document is created and carried on every snapshot,
/// so lineage consumers never have to infer it from the link.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Link of a task document: `"{factory_link}/{id}"`.
///
/// Assigned at creation and stable for the lifetime of the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentLink(String);

impl DocumentLink {
    pub fn new(link: impl Into<String>) -> Self {
        Self(link.into())
    }

    /// Build a link under a factory from a ULID.
    pub fn under(factory_link: &str, ulid: Ulid) -> Self {
        let factory = factory_link.trim_end_matches('/');
        Self(format!("{factory}/{}", ulid.to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The factory part of the link (everything before the last `/`).
    pub fn factory(&self) -> &str {
        match self.0.rfind('/') {
            Some(0) | None => "",
            Some(idx) => &self.0[..idx],
        }
    }

    /// The last path segment of the link.
    pub fn id(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }
}

impl fmt::Display for DocumentLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DocumentLink {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identity of one stage snapshot: `"{document_link}_{sub_stage}_{update_time_micros}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotKey(String);

impl SnapshotKey {
    pub fn new(link: &DocumentLink, sub_stage: &str, update_time_micros: u64) -> Self {
        Self(format!("{link}_{sub_stage}_{update_time_micros}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
