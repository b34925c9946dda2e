//! DocumentStore port - task document の正本（source of truth）
//!
//! DocumentStore が保証すること：
//! - document ごとの単調増加 version と update time
//! - `compare_and_put` は期待 version と一致した書き込みだけを通す
//! - 成功した書き込みはすべて StageSnapshot として残る（purge されるまで）
//! - 種類・更新時刻での横断クエリ（lineage 用）

use async_trait::async_trait;

use crate::domain::{DocumentLink, StageSnapshot, StoreError, TaskDocument, TaskType};

/// DocumentStore は task document と snapshot の保存先
///
/// # 設計原則
/// - 1 version につき成功する writer は 1 つだけ
/// - 古い version を見た writer は `StoreError::VersionConflict` を受け取り、読み直す
/// - 明示的なロックは提供しない
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 新規作成。version=1 と update time は store が付与する。
    async fn create(&self, doc: TaskDocument) -> Result<TaskDocument, StoreError>;

    async fn get(&self, link: &DocumentLink) -> Result<Option<TaskDocument>, StoreError>;

    /// `expected_version` が現在の version と一致するときだけ置き換える。
    async fn compare_and_put(
        &self,
        doc: TaskDocument,
        expected_version: u64,
    ) -> Result<TaskDocument, StoreError>;

    async fn list(&self, task_type: Option<&TaskType>) -> Result<Vec<TaskDocument>, StoreError>;

    async fn snapshots(&self, query: &SnapshotQuery) -> Result<Vec<StageSnapshot>, StoreError>;

    /// 期限切れの document を snapshot ごと削除し、削除したものを返す。
    async fn purge_expired(&self, now_micros: u64) -> Result<Vec<TaskDocument>, StoreError>;

    /// document と snapshot を削除。存在しなければ false。
    async fn purge(&self, link: &DocumentLink) -> Result<bool, StoreError>;
}

/// Snapshot の横断クエリ条件（未指定は全件）
#[derive(Debug, Clone, Default)]
pub struct SnapshotQuery {
    pub task_types: Option<Vec<TaskType>>,
    pub updated_after: Option<u64>,
    pub updated_before: Option<u64>,
}

impl SnapshotQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_types(mut self, task_types: impl IntoIterator<Item = TaskType>) -> Self {
        self.task_types = Some(task_types.into_iter().collect());
        self
    }

    pub fn updated_after(mut self, micros: u64) -> Self {
        self.updated_after = Some(micros);
        self
    }

    pub fn updated_before(mut self, micros: u64) -> Self {
        self.updated_before = Some(micros);
        self
    }

    pub fn matches(&self, snapshot: &StageSnapshot) -> bool {
        if let Some(types) = &self.task_types
            && !types.contains(&snapshot.task_type)
        {
            return false;
        }
        if let Some(after) = self.updated_after
            && snapshot.update_time_micros <= after
        {
            return false;
        }
        if let Some(before) = self.updated_before
            && snapshot.update_time_micros >= before
        {
            return false;
        }
        true
    }
}
