//! In-memory document store implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{DocumentLink, StageSnapshot, StoreError, TaskDocument, TaskType};
use crate::ports::{Clock, DocumentStore, SnapshotQuery};

/// In-memory store state.
#[derive(Default)]
struct StoreState {
    /// Latest version of every document (single source of truth).
    documents: HashMap<DocumentLink, TaskDocument>,

    /// Every committed version, oldest first.
    history: HashMap<DocumentLink, Vec<StageSnapshot>>,
}

impl StoreState {
    /// Stamp and record a committed version.
    fn commit(&mut self, mut doc: TaskDocument, version: u64, now_micros: u64) -> TaskDocument {
        let last = self
            .documents
            .get(&doc.document_link)
            .map(|d| d.update_time_micros)
            .unwrap_or(0);

        doc.version = version;
        // Keys are link_subStage_micros, so two versions must never share a timestamp.
        doc.update_time_micros = now_micros.max(last + 1);

        self.history
            .entry(doc.document_link.clone())
            .or_default()
            .push(doc.to_snapshot());
        self.documents.insert(doc.document_link.clone(), doc.clone());
        doc
    }

    fn remove(&mut self, link: &DocumentLink) -> Option<TaskDocument> {
        self.history.remove(link);
        self.documents.remove(link)
    }
}

/// Single-process stand-in for the replicated document store.
///
/// One `tokio::sync::Mutex` guards the whole state; every method holds it for
/// the duration of one read or one compare-and-put.
pub struct InMemoryDocumentStore {
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl InMemoryDocumentStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Number of live documents.
    pub async fn len(&self) -> usize {
        self.state.lock().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, doc: TaskDocument) -> Result<TaskDocument, StoreError> {
        let now = self.clock.now_micros();
        let mut state = self.state.lock().await;
        if state.documents.contains_key(&doc.document_link) {
            return Err(StoreError::AlreadyExists(doc.document_link));
        }
        Ok(state.commit(doc, 1, now))
    }

    async fn get(&self, link: &DocumentLink) -> Result<Option<TaskDocument>, StoreError> {
        Ok(self.state.lock().await.documents.get(link).cloned())
    }

    async fn compare_and_put(
        &self,
        doc: TaskDocument,
        expected_version: u64,
    ) -> Result<TaskDocument, StoreError> {
        let now = self.clock.now_micros();
        let mut state = self.state.lock().await;
        let actual = match state.documents.get(&doc.document_link) {
            Some(current) => current.version,
            None => return Err(StoreError::NotFound(doc.document_link)),
        };
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                link: doc.document_link,
                expected: expected_version,
                actual,
            });
        }
        Ok(state.commit(doc, actual + 1, now))
    }

    async fn list(&self, task_type: Option<&TaskType>) -> Result<Vec<TaskDocument>, StoreError> {
        let state = self.state.lock().await;
        let mut docs: Vec<TaskDocument> = state
            .documents
            .values()
            .filter(|d| task_type.is_none_or(|t| &d.task_type == t))
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.update_time_micros);
        Ok(docs)
    }

    async fn snapshots(&self, query: &SnapshotQuery) -> Result<Vec<StageSnapshot>, StoreError> {
        let state = self.state.lock().await;
        let mut snapshots: Vec<StageSnapshot> = state
            .history
            .values()
            .flatten()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        snapshots.sort_by_key(|s| s.update_time_micros);
        Ok(snapshots)
    }

    async fn purge_expired(&self, now_micros: u64) -> Result<Vec<TaskDocument>, StoreError> {
        let mut state = self.state.lock().await;
        let expired: Vec<DocumentLink> = state
            .documents
            .values()
            .filter(|d| d.is_expired(now_micros))
            .map(|d| d.document_link.clone())
            .collect();

        Ok(expired
            .iter()
            .filter_map(|link| state.remove(link))
            .collect())
    }

    async fn purge(&self, link: &DocumentLink) -> Result<bool, StoreError> {
        Ok(self.state.lock().await.remove(link).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStage;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn store() -> (Arc<FixedClock>, InMemoryDocumentStore) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = InMemoryDocumentStore::new(clock.clone());
        (clock, store)
    }

    fn doc(link: &str) -> TaskDocument {
        TaskDocument::new(
            DocumentLink::new(link),
            TaskType::new("placement"),
            "CREATED",
            json!({}),
        )
    }

    #[tokio::test]
    async fn create_assigns_first_version() {
        let (_, store) = store();
        let created = store.create(doc("/p/1")).await.unwrap();
        assert_eq!(created.version, 1);
        assert!(created.update_time_micros > 0);

        let again = store.create(doc("/p/1")).await;
        assert!(matches!(again, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let (_, store) = store();
        let created = store.create(doc("/p/1")).await.unwrap();

        let mut next = created.clone();
        next.stage = TaskStage::Started;
        let committed = store.compare_and_put(next.clone(), 1).await.unwrap();
        assert_eq!(committed.version, 2);

        let stale = store.compare_and_put(next, 1).await;
        assert!(matches!(
            stale,
            Err(StoreError::VersionConflict {
                expected: 1,
                actual: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn update_times_increase_under_a_frozen_clock() {
        let (_, store) = store();
        let created = store.create(doc("/p/1")).await.unwrap();
        let mut next = created.clone();
        next.sub_stage = "COMPLETED".into();
        let committed = store.compare_and_put(next, 1).await.unwrap();

        assert_eq!(
            committed.update_time_micros,
            created.update_time_micros + 1
        );

        let snapshots = store.snapshots(&SnapshotQuery::all()).await.unwrap();
        assert_eq!(snapshots.len(), 2);
        assert_ne!(snapshots[0].key(), snapshots[1].key());
    }

    #[tokio::test]
    async fn purge_expired_drops_history() {
        let (clock, store) = store();
        let mut expiring = doc("/p/1");
        expiring.expiration_micros = Some(clock.now_micros() + 10);
        store.create(expiring).await.unwrap();
        store.create(doc("/p/2")).await.unwrap();

        assert!(store.purge_expired(clock.now_micros()).await.unwrap().is_empty());

        clock.advance(std::time::Duration::from_secs(1));
        let purged = store.purge_expired(clock.now_micros()).await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].document_link.as_str(), "/p/1");

        let left = store.snapshots(&SnapshotQuery::all()).await.unwrap();
        assert!(left.iter().all(|s| s.document_link.as_str() == "/p/2"));
        assert_eq!(store.len().await, 1);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// In-memory store whose next `n` compare-and-puts lose to a phantom writer.
    pub struct ConflictingStore {
        inner: InMemoryDocumentStore,
        conflicts: AtomicU32,
    }

    impl ConflictingStore {
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                inner: InMemoryDocumentStore::new(clock),
                conflicts: AtomicU32::new(0),
            }
        }

        pub fn inject(&self, n: u32) {
            self.conflicts.store(n, Ordering::SeqCst);
        }

        pub fn remaining(&self) -> u32 {
            self.conflicts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DocumentStore for ConflictingStore {
        async fn create(&self, doc: TaskDocument) -> Result<TaskDocument, StoreError> {
            self.inner.create(doc).await
        }

        async fn get(&self, link: &DocumentLink) -> Result<Option<TaskDocument>, StoreError> {
            self.inner.get(link).await
        }

        async fn compare_and_put(
            &self,
            doc: TaskDocument,
            expected_version: u64,
        ) -> Result<TaskDocument, StoreError> {
            let lost = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Err(StoreError::VersionConflict {
                    link: doc.document_link,
                    expected: expected_version,
                    actual: expected_version + 1,
                });
            }
            self.inner.compare_and_put(doc, expected_version).await
        }

        async fn list(&self, task_type: Option<&TaskType>) -> Result<Vec<TaskDocument>, StoreError> {
            self.inner.list(task_type).await
        }

        async fn snapshots(&self, query: &SnapshotQuery) -> Result<Vec<StageSnapshot>, StoreError> {
            self.inner.snapshots(query).await
        }

        async fn purge_expired(&self, now_micros: u64) -> Result<Vec<TaskDocument>, StoreError> {
            self.inner.purge_expired(now_micros).await
        }

        async fn purge(&self, link: &DocumentLink) -> Result<bool, StoreError> {
            self.inner.purge(link).await
        }
    }
}
