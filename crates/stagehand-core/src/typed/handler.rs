//! Handler trait - sub-stage を 1 つ進める Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::collections::BTreeMap;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::task::{SubStage, Task};
use crate::app::runtime::{StartRequest, TaskRuntime};
use crate::domain::{
    DocumentLink, FailureCause, HandlerError, StageSnapshot, TaskCallback, TaskDocument,
    TaskError, TaskStage, TransitionSource,
};

/// Handler は現在の sub-stage の処理を行い、次の一手（Step）を返す
///
/// # 使用例
/// ```ignore
/// struct PlacementHandler { adapter: Arc<dyn ProvisioningAdapter> }
///
/// #[async_trait]
/// impl Handler<Placement> for PlacementHandler {
///     async fn handle(&self, ctx: &TaskContext<Placement>, state: &TaskState<Placement>)
///         -> Result<Step<Placement>, HandlerError> {
///         let hosts = self.adapter.select_hosts(&state.payload.resource_pool_links, 1).await?;
///         Ok(Step::complete_with(PlacementPayload { host_selections: hosts, ..Default::default() }))
///     }
/// }
/// ```
///
/// # 約束
/// - Handler は内部でリトライしない。`Err` を返すと task は FAILED/ERROR になる
/// - 他の task を待つときはブロックせず `Step::Await` を返す
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(
        &self,
        ctx: &TaskContext<T>,
        state: &TaskState<T>,
    ) -> Result<Step<T>, HandlerError>;
}

/// Handler の返す次の一手
pub enum Step<T: Task> {
    /// STARTED のまま次の sub-stage へ
    Proceed {
        sub_stage: T::SubStage,
        patch: Option<T::Payload>,
    },

    /// FINISHED/COMPLETED へ
    Complete { patch: Option<T::Payload> },

    /// FAILED/ERROR へ
    Fail { cause: FailureCause },

    /// 何もしない（子 task の callback など外部からの patch を待つ）
    Await,
}

impl<T: Task> Step<T> {
    pub fn proceed(sub_stage: T::SubStage) -> Self {
        Step::Proceed {
            sub_stage,
            patch: None,
        }
    }

    pub fn proceed_with(sub_stage: T::SubStage, payload: T::Payload) -> Self {
        Step::Proceed {
            sub_stage,
            patch: Some(payload),
        }
    }

    pub fn complete() -> Self {
        Step::Complete { patch: None }
    }

    pub fn complete_with(payload: T::Payload) -> Self {
        Step::Complete {
            patch: Some(payload),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Step::Fail {
            cause: FailureCause::new(message),
        }
    }

    fn into_dyn(self) -> Result<DynStep, HandlerError> {
        let encode = |patch: Option<T::Payload>| -> Result<Value, HandlerError> {
            match patch {
                Some(p) => serde_json::to_value(p)
                    .map_err(|e| HandlerError::new(format!("json encode: {e}"))),
                None => Ok(Value::Null),
            }
        };
        Ok(match self {
            Step::Proceed { sub_stage, patch } => DynStep::Proceed {
                sub_stage: sub_stage.name(),
                patch: encode(patch)?,
            },
            Step::Complete { patch } => DynStep::Complete {
                patch: encode(patch)?,
            },
            Step::Fail { cause } => DynStep::Fail { cause },
            Step::Await => DynStep::Await,
        })
    }
}

/// 型消去された Step（runtime が解釈する）
#[derive(Debug, Clone, PartialEq)]
pub enum DynStep {
    Proceed { sub_stage: String, patch: Value },
    Complete { patch: Value },
    Fail { cause: FailureCause },
    Await,
}

/// Handler に渡される型付きの document 状態
pub struct TaskState<T: Task> {
    pub document_link: DocumentLink,
    pub stage: TaskStage,
    pub sub_stage: T::SubStage,
    pub payload: T::Payload,
    pub custom_properties: BTreeMap<String, String>,
    pub tenant_links: Vec<String>,
    pub failure: Option<FailureCause>,
}

impl<T: Task> TaskState<T> {
    pub fn from_document(doc: &TaskDocument) -> Result<Self, TaskError> {
        if doc.task_type.as_str() != T::TYPE {
            return Err(TaskError::Validation(format!(
                "{} is a '{}' task, not '{}'",
                doc.document_link,
                doc.task_type,
                T::TYPE
            )));
        }
        let sub_stage = T::SubStage::parse(&doc.sub_stage).ok_or_else(|| {
            TaskError::Validation(format!(
                "unknown sub-stage '{}' for '{}'",
                doc.sub_stage,
                T::TYPE
            ))
        })?;
        let payload = serde_json::from_value(doc.payload.clone())
            .map_err(|e| TaskError::Codec(format!("{}: {e}", doc.document_link)))?;

        Ok(Self {
            document_link: doc.document_link.clone(),
            stage: doc.stage,
            sub_stage,
            payload,
            custom_properties: doc.custom_properties.clone(),
            tenant_links: doc.tenant_links.clone(),
            failure: doc.failure.clone(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

impl<T: Task> Clone for TaskState<T> {
    fn clone(&self) -> Self {
        Self {
            document_link: self.document_link.clone(),
            stage: self.stage,
            sub_stage: self.sub_stage,
            payload: self.payload.clone(),
            custom_properties: self.custom_properties.clone(),
            tenant_links: self.tenant_links.clone(),
            failure: self.failure.clone(),
        }
    }
}

/// Handler 実行中のコンテキスト
///
/// - 実行対象の snapshot（次の遷移の transition source になる）
/// - 子 task の起動と他 task の読み出し
pub struct TaskContext<T: Task> {
    runtime: TaskRuntime,
    snapshot: StageSnapshot,
    tenant_links: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task> TaskContext<T> {
    pub(crate) fn new(runtime: TaskRuntime, doc: &TaskDocument) -> Self {
        Self {
            runtime,
            snapshot: doc.to_snapshot(),
            tenant_links: doc.tenant_links.clone(),
            _marker: PhantomData,
        }
    }

    pub fn link(&self) -> &DocumentLink {
        &self.snapshot.document_link
    }

    /// Handler が実行されている version の snapshot
    pub fn snapshot(&self) -> &StageSnapshot {
        &self.snapshot
    }

    /// この version を引き起こした snapshot（子 task の完了 callback なら子の終端 snapshot）
    pub fn transition_source(&self) -> Option<&TransitionSource> {
        self.snapshot.transition_source.as_ref()
    }

    /// 子 task を起動する
    ///
    /// - 子の link は `{C::FACTORY_LINK}/{自分の id}`。再実行されても二重に作られない
    /// - 子が FINISHED になると `on_finished`、FAILED になると `on_failed` へ patch される
    /// - tenant links と custom properties は子に引き継がれる
    pub async fn spawn_child<C: Task>(
        &self,
        payload: C::Payload,
        on_finished: T::SubStage,
        on_failed: T::SubStage,
    ) -> Result<DocumentLink, TaskError> {
        let child_link = DocumentLink::new(format!(
            "{}/{}",
            C::FACTORY_LINK.trim_end_matches('/'),
            self.link().id()
        ));
        let request = StartRequest::<C>::new(payload)
            .with_link(child_link)
            .with_tenant_links(self.tenant_links.clone())
            .with_custom_properties(self.snapshot.custom_properties.clone())
            .with_callback(TaskCallback {
                parent_link: self.link().clone(),
                on_finished: on_finished.name(),
                on_failed: on_failed.name(),
            })
            .caused_by(self.snapshot.as_source());
        self.runtime.start::<C>(request).await
    }

    pub async fn load<C: Task>(&self, link: &DocumentLink) -> Result<TaskState<C>, TaskError> {
        self.runtime.get::<C>(link).await
    }

    /// transition source の document を読む（子の完了 callback 後に子の結果を取り出す）
    pub async fn load_source<C: Task>(&self) -> Result<TaskState<C>, TaskError> {
        let source = self.transition_source().ok_or_else(|| {
            TaskError::Validation(format!("{} has no transition source", self.link()))
        })?;
        self.runtime.get::<C>(&source.document_link).await
    }
}

/// DynHandler は object-safe な Handler の抽象化
///
/// TypedHandler<T, H> を DynHandler に変換することで、
/// HashMap<String, Arc<dyn DynHandler>> に格納可能にします。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        runtime: TaskRuntime,
        doc: TaskDocument,
    ) -> Result<DynStep, HandlerError>;

    fn task_type(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        runtime: TaskRuntime,
        doc: TaskDocument,
    ) -> Result<DynStep, HandlerError> {
        let state = TaskState::<T>::from_document(&doc)?;
        let ctx = TaskContext::<T>::new(runtime, &doc);
        self.handler.handle(&ctx, &state).await?.into_dyn()
    }

    fn task_type(&self) -> &str {
        T::TYPE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use crate::typed::task::fixtures::{StepPayload, StepSubStage, StepTask};
    use serde_json::json;

    fn doc(sub_stage: &str, payload: Value) -> TaskDocument {
        TaskDocument::new(
            DocumentLink::new("/test/steps/a"),
            TaskType::new(StepTask::TYPE),
            sub_stage,
            payload,
        )
    }

    #[test]
    fn state_decodes_payload_and_sub_stage() {
        let state =
            TaskState::<StepTask>::from_document(&doc("PREPARED", json!({ "label": "x" })))
                .unwrap();
        assert_eq!(state.sub_stage, StepSubStage::Prepared);
        assert_eq!(state.payload.label.as_deref(), Some("x"));
    }

    #[test]
    fn unknown_sub_stage_is_rejected() {
        let result = TaskState::<StepTask>::from_document(&doc("NOPE", json!({})));
        assert!(matches!(result, Err(TaskError::Validation(_))));
    }

    #[test]
    fn step_patch_drops_unset_fields() {
        let step = Step::<StepTask>::proceed_with(
            StepSubStage::Finalizing,
            StepPayload {
                label: Some("done".into()),
                ..Default::default()
            },
        );
        match step.into_dyn().unwrap() {
            DynStep::Proceed { sub_stage, patch } => {
                assert_eq!(sub_stage, "FINALIZING");
                assert_eq!(patch, json!({ "label": "done", "failAt": null }));
            }
            other => panic!("unexpected step {other:?}"),
        }
    }
}
