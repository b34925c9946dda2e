//! TaskRuntime - start / validate / transition / self-advance
//!
//! # フロー
//! 1. `start` が document を CREATED で作り、STARTED に進める
//! 2. STARTED の commit ごとに、その sub-stage の handler を tokio task で実行
//! 3. handler の Step を自分自身への patch として commit（CAS + ConflictRetry）
//! 4. FINISHED / FAILED の commit で親の callback sub-stage へ patch
//!
//! # Transition source の記録
//! - 自分への遷移: handler が実行された snapshot
//! - 子の作成: 子を起動した親の snapshot
//! - 子の完了 callback: 子の終端 snapshot

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::retry::ConflictRetry;
use super::transition::{TransitionOutcome, Verdict, check_transition, describe};
use crate::config::{ControlPlaneConfig, ExpirationConfig};
use crate::domain::{
    DocumentLink, FailureCause, StagePatch, StoreError, TaskCallback, TaskDocument, TaskError,
    TaskStage, TransitionSource,
};
use crate::ports::{Clock, DocumentStore, IdGenerator};
use crate::typed::merge::{merge_payload, merge_properties};
use crate::typed::{DynStep, Task, TaskEntry, TaskRegistry, TaskState};

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// create が既存の document に当たったときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartDirective {
    /// 新規作成。既に存在すれば何もしない
    ///
    /// 作成後の STARTED への遷移が失敗して CREATED のまま残った document だけは
    /// STARTED に進める（再試行した start で回復できる）。
    #[default]
    Create,

    /// 再起動後の再生。終端でなければ現在の sub-stage の handler を再実行する
    Resume,
}

/// `TaskRuntime::start` の入力
pub struct StartRequest<T: Task> {
    pub payload: T::Payload,
    pub document_link: Option<DocumentLink>,
    pub directive: StartDirective,
    pub tenant_links: Vec<String>,
    pub custom_properties: BTreeMap<String, String>,
    pub callback: Option<TaskCallback>,
    pub transition_source: Option<TransitionSource>,
}

impl<T: Task> StartRequest<T> {
    pub fn new(payload: T::Payload) -> Self {
        Self {
            payload,
            document_link: None,
            directive: StartDirective::Create,
            tenant_links: Vec::new(),
            custom_properties: BTreeMap::new(),
            callback: None,
            transition_source: None,
        }
    }

    pub fn with_link(mut self, link: DocumentLink) -> Self {
        self.document_link = Some(link);
        self
    }

    pub fn resume(mut self) -> Self {
        self.directive = StartDirective::Resume;
        self
    }

    pub fn with_tenant_links(mut self, tenant_links: Vec<String>) -> Self {
        self.tenant_links = tenant_links;
        self
    }

    pub fn with_custom_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.custom_properties = properties;
        self
    }

    pub fn with_callback(mut self, callback: TaskCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn caused_by(mut self, source: TransitionSource) -> Self {
        self.transition_source = Some(source);
        self
    }
}

struct RuntimeInner {
    store: Arc<dyn DocumentStore>,
    registry: Arc<TaskRegistry>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: ConflictRetry,
    expiration: ExpirationConfig,
}

/// 全 task type 共通の実行エンジン（Clone は Arc の複製）
#[derive(Clone)]
pub struct TaskRuntime {
    inner: Arc<RuntimeInner>,
}

impl TaskRuntime {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<TaskRegistry>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: &ControlPlaneConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                store,
                registry,
                clock,
                ids,
                retry: ConflictRetry::from(&config.conflict_retry),
                expiration: config.expiration.clone(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.inner.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    fn entry(&self, task_type: &str) -> Result<Arc<TaskEntry>, TaskError> {
        self.inner
            .registry
            .get(task_type)
            .ok_or_else(|| TaskError::UnknownTaskType(task_type.to_string()))
    }

    fn expires_in(&self, ttl: Duration) -> u64 {
        let ttl = u64::try_from(ttl.as_micros()).unwrap_or(u64::MAX);
        self.inner.clock.now_micros().saturating_add(ttl)
    }

    /// Task を作成して開始する
    ///
    /// - link 未指定なら `{T::FACTORY_LINK}/{ulid}` を発行
    /// - 既存の link なら directive に従う（Create は CREATED のときだけ開始、Resume は再実行）
    pub async fn start<T: Task>(&self, request: StartRequest<T>) -> Result<DocumentLink, TaskError> {
        let entry = self.entry(T::TYPE)?;
        let link = match request.document_link {
            Some(link) => link,
            None => self.inner.ids.generate_link(T::FACTORY_LINK),
        };

        if let Some(existing) = self.inner.store.get(&link).await? {
            match request.directive {
                StartDirective::Create if existing.stage == TaskStage::Created => {
                    debug!(%link, "Task exists but never started, starting it");
                    self.resume_document(existing).await?;
                }
                StartDirective::Create => {
                    debug!(%link, "Task already exists, ignoring create");
                }
                StartDirective::Resume => self.resume_document(existing).await?,
            }
            return Ok(link);
        }

        let payload = serde_json::to_value(&request.payload)
            .map_err(|e| TaskError::Codec(format!("{link}: {e}")))?;
        let mut doc = TaskDocument::new(
            link.clone(),
            entry.task_type.clone(),
            entry.graph.initial(),
            payload,
        );
        doc.tenant_links = request.tenant_links;
        doc.custom_properties = request.custom_properties;
        doc.callback = request.callback;
        doc.transition_source = request.transition_source;
        doc.expiration_micros = Some(self.expires_in(self.inner.expiration.task_ttl()));

        let created = match self.inner.store.create(doc).await {
            Ok(created) => created,
            Err(StoreError::AlreadyExists(_)) => {
                debug!(%link, "Task created concurrently, ignoring create");
                return Ok(link);
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            task_type = T::TYPE,
            %link,
            parent = ?created.callback.as_ref().map(|c| c.parent_link.as_str()),
            "Starting task"
        );

        self.patch(
            &link,
            StagePatch::new(TaskStage::Started, entry.graph.initial()),
        )
        .await?;
        Ok(link)
    }

    async fn resume_document(&self, doc: TaskDocument) -> Result<(), TaskError> {
        match doc.stage {
            TaskStage::Created => {
                info!(link = %doc.document_link, "Restarting task");
                let patch = StagePatch::new(TaskStage::Started, doc.sub_stage.clone());
                self.patch(&doc.document_link, patch).await?;
            }
            TaskStage::Started => {
                info!(
                    link = %doc.document_link,
                    sub_stage = %doc.sub_stage,
                    "Restarting task"
                );
                self.dispatch(doc);
            }
            _ => {
                debug!(link = %doc.document_link, stage = %doc.stage, "Task is terminal, nothing to resume");
            }
        }
        Ok(())
    }

    /// 検証して commit する（version conflict は ConflictRetry の範囲で再試行）
    pub async fn patch(
        &self,
        link: &DocumentLink,
        patch: StagePatch,
    ) -> Result<TransitionOutcome, TaskError> {
        if !(patch.payload.is_null() || patch.payload.is_object()) {
            let e = TaskError::Validation(format!("{link}: payload patch must be a JSON object"));
            warn!(%link, error = %e, "Rejected transition");
            return Err(e);
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let current = self
                .inner
                .store
                .get(link)
                .await?
                .ok_or_else(|| TaskError::NotFound(link.clone()))?;
            let entry = self.entry(current.task_type.as_str())?;

            let verdict = check_transition(&entry.graph, &current, &patch)
                .inspect_err(|e| warn!(%link, error = %e, "Rejected transition"))?;
            match verdict {
                Verdict::Duplicate => {
                    debug!(%link, to = %describe(patch.stage, &patch.sub_stage), "Transition already applied");
                    return Ok(TransitionOutcome::Duplicate);
                }
                Verdict::Ignored => {
                    warn!(
                        %link,
                        from = %describe(current.stage, &current.sub_stage),
                        to = %describe(patch.stage, &patch.sub_stage),
                        "Ignoring stale transition"
                    );
                    return Ok(TransitionOutcome::Ignored);
                }
                Verdict::Apply => {}
            }

            let next = self.apply(&entry, &current, &patch);
            (entry.check_payload)(&next.payload)
                .map_err(|e| TaskError::Validation(format!("{link}: malformed payload: {e}")))
                .inspect_err(|e| warn!(%link, error = %e, "Rejected transition"))?;
            match self.inner.store.compare_and_put(next, current.version).await {
                Ok(committed) => {
                    debug!(
                        %link,
                        "Moving from {} to {}",
                        describe(current.stage, &current.sub_stage),
                        describe(committed.stage, &committed.sub_stage)
                    );
                    let snapshot = committed.to_snapshot();
                    self.after_commit(committed);
                    return Ok(TransitionOutcome::Applied(snapshot));
                }
                Err(StoreError::VersionConflict { .. }) if !self.inner.retry.exhausted(attempt) => {
                    let delay = self.inner.retry.next_delay(attempt);
                    debug!(%link, attempt, ?delay, "Version conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::VersionConflict { .. }) => {
                    warn!(%link, attempts = attempt, "Giving up after conflicting writes");
                    return Err(TaskError::ConflictRetriesExhausted {
                        link: link.clone(),
                        attempts: attempt,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn apply(&self, entry: &TaskEntry, current: &TaskDocument, patch: &StagePatch) -> TaskDocument {
        let mut next = current.clone();
        next.stage = patch.stage;
        next.sub_stage = patch.sub_stage.clone();
        merge_payload(&mut next.payload, &patch.payload, entry.merge_policy);
        merge_properties(&mut next.custom_properties, &patch.custom_properties);
        next.transition_source = Some(
            patch
                .transition_source
                .clone()
                .unwrap_or_else(|| current.to_snapshot().as_source()),
        );

        match patch.stage {
            TaskStage::Failed => {
                next.failure = Some(
                    patch
                        .failure
                        .clone()
                        .unwrap_or_else(|| FailureCause::new("task failed")),
                );
                next.expiration_micros =
                    Some(self.expires_in(self.inner.expiration.failed_retention()));
            }
            TaskStage::Finished | TaskStage::Cancelled => {
                next.expiration_micros =
                    Some(self.expires_in(self.inner.expiration.finished_retention()));
            }
            TaskStage::Created | TaskStage::Started => {}
        }
        next
    }

    fn after_commit(&self, committed: TaskDocument) {
        match committed.stage {
            TaskStage::Started => self.dispatch(committed),
            TaskStage::Finished | TaskStage::Failed => {
                if committed.stage == TaskStage::Finished {
                    info!(link = %committed.document_link, "Task completed");
                } else {
                    info!(
                        link = %committed.document_link,
                        failure = ?committed.failure.as_ref().map(|f| f.message.as_str()),
                        "Task failed"
                    );
                }
                if committed.callback.is_some() {
                    tokio::spawn(self.clone().notify_parent(committed, None));
                }
            }
            // No cancellation propagation.
            TaskStage::Created | TaskStage::Cancelled => {}
        }
    }

    fn dispatch(&self, doc: TaskDocument) {
        tokio::spawn(self.clone().run_handler(doc));
    }

    fn run_handler(self, doc: TaskDocument) -> BoxFuture {
        Box::pin(async move {
            let link = doc.document_link.clone();
            let entry = match self.entry(doc.task_type.as_str()) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(%link, error = %e, "No handler for task");
                    return;
                }
            };
            let source = doc.to_snapshot().as_source();
            let sub_stage = doc.sub_stage.clone();

            let patch = match entry.handler.handle_dyn(self.clone(), doc).await {
                Ok(DynStep::Await) => return,
                Ok(DynStep::Proceed { sub_stage, patch }) => {
                    StagePatch::new(TaskStage::Started, sub_stage).with_payload(patch)
                }
                Ok(DynStep::Complete { patch }) => {
                    StagePatch::new(TaskStage::Finished, entry.graph.completed()).with_payload(patch)
                }
                Ok(DynStep::Fail { cause }) => {
                    StagePatch::new(TaskStage::Failed, entry.graph.error()).with_failure(cause)
                }
                Err(e) => {
                    warn!(%link, %sub_stage, error = %e, "Handler failed");
                    StagePatch::new(TaskStage::Failed, entry.graph.error())
                        .with_failure(FailureCause::new(e.message))
                }
            };

            if let Err(e) = self.patch(&link, patch.with_source(source)).await {
                warn!(%link, %sub_stage, error = %e, "Failed to apply handler transition");
            }
        })
    }

    fn notify_parent(self, child: TaskDocument, failure: Option<FailureCause>) -> BoxFuture {
        Box::pin(async move {
            if let Err(e) = self.deliver_callback(&child, failure).await {
                warn!(child = %child.document_link, error = %e, "Failed to notify parent task");
            }
        })
    }

    /// 子の結果を親の callback sub-stage として patch する
    ///
    /// - 成功: `on_finished`（STARTED のまま）
    /// - 失敗: `on_failed` が親の ERROR なら FAILED + failure cause、そうでなければ STARTED
    async fn deliver_callback(
        &self,
        child: &TaskDocument,
        failure: Option<FailureCause>,
    ) -> Result<(), TaskError> {
        let Some(callback) = &child.callback else {
            return Ok(());
        };
        let parent = self.document(&callback.parent_link).await?;
        let entry = self.entry(parent.task_type.as_str())?;

        let patch = if child.stage == TaskStage::Finished && failure.is_none() {
            StagePatch::new(TaskStage::Started, callback.on_finished.clone())
        } else {
            let cause = failure
                .or_else(|| child.failure.clone())
                .unwrap_or_else(|| FailureCause::new(format!("{} failed", child.document_link)));
            let origin = cause
                .origin
                .clone()
                .unwrap_or_else(|| child.document_link.clone());
            if callback.on_failed == entry.graph.error() {
                StagePatch::new(TaskStage::Failed, callback.on_failed.clone())
                    .with_failure(FailureCause::from_origin(cause.message, origin))
            } else {
                StagePatch::new(TaskStage::Started, callback.on_failed.clone())
            }
        };
        let patch = patch
            .with_custom_properties(child.custom_properties.clone())
            .with_source(child.to_snapshot().as_source());

        self.patch(&callback.parent_link, patch).await?;
        Ok(())
    }

    /// FAILED/ERROR へ
    pub async fn fail(
        &self,
        link: &DocumentLink,
        cause: FailureCause,
    ) -> Result<TransitionOutcome, TaskError> {
        let doc = self.document(link).await?;
        let entry = self.entry(doc.task_type.as_str())?;
        let patch = StagePatch::new(TaskStage::Failed, entry.graph.error()).with_failure(cause);
        self.patch(link, patch).await
    }

    /// CANCELLED/CANCELLED へ（子 task には伝播しない）
    pub async fn cancel(&self, link: &DocumentLink) -> Result<TransitionOutcome, TaskError> {
        let doc = self.document(link).await?;
        let entry = self.entry(doc.task_type.as_str())?;
        let patch = StagePatch::new(TaskStage::Cancelled, entry.graph.cancelled());
        self.patch(link, patch).await
    }

    pub async fn get<T: Task>(&self, link: &DocumentLink) -> Result<TaskState<T>, TaskError> {
        let doc = self.document(link).await?;
        TaskState::from_document(&doc)
    }

    pub async fn document(&self, link: &DocumentLink) -> Result<TaskDocument, TaskError> {
        self.inner
            .store
            .get(link)
            .await?
            .ok_or_else(|| TaskError::NotFound(link.clone()))
    }

    /// FINISHED / FAILED / CANCELLED になるまで poll する
    pub async fn wait_for_terminal(
        &self,
        link: &DocumentLink,
        timeout: Duration,
    ) -> Result<TaskDocument, TaskError> {
        let poll = async {
            loop {
                let doc = self.document(link).await?;
                if doc.stage.is_terminal() {
                    return Ok::<_, TaskError>(doc);
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| TaskError::Timeout(link.clone()))?
    }

    /// プロセス再起動時: 終端でない登録済み task をすべて再開する
    pub async fn resume_all(&self) -> Result<usize, TaskError> {
        let docs = self.inner.store.list(None).await?;
        let mut resumed = 0;
        for doc in docs {
            if !doc.stage.is_active() || self.inner.registry.get(doc.task_type.as_str()).is_none() {
                continue;
            }
            self.resume_document(doc).await?;
            resumed += 1;
        }
        info!(resumed, "Resumed unfinished tasks");
        Ok(resumed)
    }

    /// 期限切れの document を削除する
    ///
    /// CREATED / STARTED のまま期限切れになった task は親に失敗を通知する。
    pub async fn purge_expired(&self) -> Result<Vec<DocumentLink>, TaskError> {
        let now = self.inner.clock.now_micros();
        let expired = self.inner.store.purge_expired(now).await?;

        let mut links = Vec::with_capacity(expired.len());
        for doc in expired {
            if doc.stage.is_active() {
                let message = format!("Task expired in stage: {}", doc.stage);
                warn!(link = %doc.document_link, "{message}");
                if doc.callback.is_some() {
                    self.deliver_callback(&doc, Some(FailureCause::new(message)))
                        .await
                        .unwrap_or_else(|e| {
                            warn!(link = %doc.document_link, error = %e, "Updating parent of expired task failed");
                        });
                }
            } else {
                debug!(link = %doc.document_link, stage = %doc.stage, "Purged task");
            }
            links.push(doc.document_link);
        }
        Ok(links)
    }
}
