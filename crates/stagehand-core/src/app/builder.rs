//! ControlPlaneBuilder - control plane の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - レジストリは build 後 `Arc` で不変共有（グローバル状態なし）

use std::sync::Arc;

use super::runtime::TaskRuntime;
use super::sweeper::ExpirationSweeper;
use crate::config::{ConfigError, ControlPlaneConfig};
use crate::lineage::{LineageService, LineageVisitor, VisitorRegistry};
use crate::ports::{Clock, DocumentStore, IdGenerator, SystemClock, UlidGenerator};
use crate::typed::{Handler, RegistryError, Task, TaskRegistry};

/// ControlPlaneBuilder は TaskRuntime と LineageService を構築
///
/// # 使用例
/// ```ignore
/// let control_plane = ControlPlaneBuilder::new(store)
///     .with_config(config)
///     .register::<Placement, _>(PlacementHandler::new(adapter))?
///     .register_visitor(Arc::new(ContainerRequestVisitor))?
///     .expect_tasks(&["placement"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct ControlPlaneBuilder {
    store: Arc<dyn DocumentStore>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    config: ControlPlaneConfig,
    registry: TaskRegistry,
    visitors: VisitorRegistry,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError は control plane 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl ControlPlaneBuilder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            clock: None,
            ids: None,
            config: ControlPlaneConfig::default(),
            registry: TaskRegistry::new(),
            visitors: VisitorRegistry::new(),
            expected_tasks: None,
        }
    }

    /// 未指定なら SystemClock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 未指定なら clock を使う UlidGenerator
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_config(mut self, config: ControlPlaneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_visitor(
        mut self,
        visitor: Arc<dyn LineageVisitor>,
    ) -> Result<Self, RegistryError> {
        self.visitors.register(visitor)?;
        Ok(self)
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// # 検証
    /// - config の値
    /// - expect_tasks() で設定された task_type が全て登録されているか
    pub fn build(self) -> Result<ControlPlane, BuildError> {
        self.config.validate()?;
        if let Some(expected_tasks) = &self.expected_tasks {
            let registered_types = self.registry.registered_types();
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|x| !registered_types.contains(x))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let roots = self.registry.root_sub_stages();

        let runtime = TaskRuntime::new(
            self.store.clone(),
            Arc::new(self.registry),
            clock,
            ids,
            &self.config,
        );
        let lineage = LineageService::new(self.store, Arc::new(self.visitors), roots);
        Ok(ControlPlane {
            runtime,
            lineage,
            config: self.config,
        })
    }
}

/// 構築済みの control plane
pub struct ControlPlane {
    pub runtime: TaskRuntime,
    pub lineage: LineageService,
    pub config: ControlPlaneConfig,
}

impl ControlPlane {
    /// `sweeper.interval_secs` ごとに期限切れの task を purge する
    pub fn spawn_sweeper(&self) -> ExpirationSweeper {
        ExpirationSweeper::spawn(self.runtime.clone(), self.config.sweeper.interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HandlerError, TaskStage};
    use crate::impls::InMemoryDocumentStore;
    use crate::lineage::{ComponentInfo, LineageGraph};
    use crate::app::StartRequest;
    use crate::domain::StageSnapshot;
    use crate::typed::task::fixtures::{StepPayload, StepTask};
    use crate::typed::{Step, TaskContext, TaskState};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Done;

    #[async_trait]
    impl Handler<StepTask> for Done {
        async fn handle(
            &self,
            _ctx: &TaskContext<StepTask>,
            _state: &TaskState<StepTask>,
        ) -> Result<Step<StepTask>, HandlerError> {
            Ok(Step::complete())
        }
    }

    struct Silent;

    impl LineageVisitor for Silent {
        fn id(&self) -> &'static str {
            "silent"
        }

        fn accepts(&self, _terminal: &StageSnapshot) -> bool {
            false
        }

        fn visit(&self, _terminal: &StageSnapshot, _graph: &LineageGraph) -> ComponentInfo {
            unreachable!("never accepts")
        }
    }

    fn builder() -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(Arc::new(InMemoryDocumentStore::new(Arc::new(SystemClock))))
    }

    #[test]
    fn test_build_missing_task_types() {
        let result = builder()
            .register::<StepTask, _>(Done)
            .unwrap()
            .expect_tasks(&[StepTask::TYPE, "placement"])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["placement".to_string()]
        ));
    }

    #[test]
    fn test_double_registration() {
        let result = builder()
            .register::<StepTask, _>(Done)
            .unwrap()
            .register::<StepTask, _>(Done);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));

        let result = builder()
            .register_visitor(Arc::new(Silent))
            .unwrap()
            .register_visitor(Arc::new(Silent));
        assert!(matches!(result, Err(RegistryError::DuplicateVisitor(_))));
    }

    #[test]
    fn invalid_config_fails_the_build() {
        let mut config = ControlPlaneConfig::default();
        config.sweeper.interval_secs = 0;
        let result = builder().with_config(config).build();
        assert!(matches!(result, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn built_runtime_runs_registered_tasks() {
        let control_plane = builder()
            .register::<StepTask, _>(Done)
            .unwrap()
            .expect_tasks(&[StepTask::TYPE])
            .build()
            .unwrap();

        let link = control_plane
            .runtime
            .start(StartRequest::<StepTask>::new(StepPayload::default()))
            .await
            .unwrap();
        let done = control_plane
            .runtime
            .wait_for_terminal(&link, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(done.stage, TaskStage::Finished);

        // No visitor accepts a test task.
        assert!(control_plane.lineage.query(&link).await.unwrap().is_empty());

        let sweeper = control_plane.spawn_sweeper();
        sweeper.shutdown_and_join().await;
    }
}
