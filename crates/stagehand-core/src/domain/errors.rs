//! Errors - エラー型と分類
//!
//! - `StoreError`: DocumentStore の失敗（version conflict を含む）
//! - `TaskError`: TaskRuntime の操作エラー
//! - `HandlerError`: sub-stage handler が返すドメイン失敗
//! - `AdapterError`: ProvisioningAdapter の失敗
//! - `AllocationError`: AllocationService の操作エラー

use super::ids::DocumentLink;

/// ErrorKind はエラーの運用分類
///
/// - Validation: 不正な遷移・入力（同期的に拒否、状態は変わらない）
/// - Conflict: version conflict（runtime が再試行する）
/// - Domain: ワークフローが進めない（task は FAILED になる）
/// - Infrastructure: store などの障害
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    Domain,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocumentLink),

    #[error("document already exists: {0}")]
    AlreadyExists(DocumentLink),

    #[error("version conflict on {link}: expected {expected}, actual {actual}")]
    VersionConflict {
        link: DocumentLink,
        expected: u64,
        actual: u64,
    },

    #[error("codec error: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("illegal transition on {link}: {from} -> {to}")]
    IllegalTransition {
        link: DocumentLink,
        from: String,
        to: String,
    },

    #[error("task type '{0}' is not registered")]
    UnknownTaskType(String),

    #[error("task not found: {0}")]
    NotFound(DocumentLink),

    #[error("gave up on {link} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { link: DocumentLink, attempts: u32 },

    #[error("timed out waiting for {0} to reach a terminal stage")]
    Timeout(DocumentLink),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Validation(_)
            | TaskError::IllegalTransition { .. }
            | TaskError::UnknownTaskType(_)
            | TaskError::NotFound(_)
            | TaskError::Codec(_) => ErrorKind::Validation,
            TaskError::ConflictRetriesExhausted { .. } => ErrorKind::Conflict,
            TaskError::Timeout(_) => ErrorKind::Infrastructure,
            TaskError::Store(e) if e.is_conflict() => ErrorKind::Conflict,
            TaskError::Store(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Handler が返すドメイン失敗。メッセージは `FailureCause.message` になる。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<TaskError> for HandlerError {
    fn from(e: TaskError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<AdapterError> for HandlerError {
    fn from(e: AdapterError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<AllocationError> for HandlerError {
    fn from(e: AllocationError) -> Self {
        Self::new(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("no capacity: {0}")]
    NoCapacity(String),

    #[error("provisioning failed: {0}")]
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("allocation pool not found: {0}")]
    PoolNotFound(DocumentLink),

    #[error("allocation pool {link} is exhausted ({capacity} blocks)")]
    PoolExhausted { link: DocumentLink, capacity: u64 },

    #[error("invalid CIDR '{0}'")]
    InvalidCidr(String),

    #[error("gave up on {link} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { link: DocumentLink, attempts: u32 },

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AllocationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AllocationError::Validation(_)
            | AllocationError::PoolNotFound(_)
            | AllocationError::InvalidCidr(_)
            | AllocationError::Codec(_) => ErrorKind::Validation,
            AllocationError::PoolExhausted { .. } => ErrorKind::Domain,
            AllocationError::ConflictRetriesExhausted { .. } => ErrorKind::Conflict,
            AllocationError::Store(e) if e.is_conflict() => ErrorKind::Conflict,
            AllocationError::Store(_) => ErrorKind::Infrastructure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn link() -> DocumentLink {
        DocumentLink::new("/requests/r1")
    }

    #[rstest]
    #[case::illegal(TaskError::IllegalTransition { link: link(), from: "STARTED(RESERVED)".into(), to: "STARTED(CREATED)".into() }, ErrorKind::Validation)]
    #[case::exhausted(TaskError::ConflictRetriesExhausted { link: link(), attempts: 3 }, ErrorKind::Conflict)]
    #[case::store_conflict(TaskError::Store(StoreError::VersionConflict { link: link(), expected: 1, actual: 2 }), ErrorKind::Conflict)]
    #[case::store_missing(TaskError::Store(StoreError::NotFound(link())), ErrorKind::Infrastructure)]
    fn task_errors_are_classified(#[case] error: TaskError, #[case] kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn pool_exhaustion_is_a_domain_failure() {
        let e = AllocationError::PoolExhausted {
            link: link(),
            capacity: 4,
        };
        assert_eq!(e.kind(), ErrorKind::Domain);
    }

    #[test]
    fn handler_error_keeps_adapter_message() {
        let e: HandlerError = AdapterError::NoCapacity("pool-a".into()).into();
        assert_eq!(e.message, "no capacity: pool-a");
    }
}
