//! TaskRegistry - task type と Handler の登録と管理
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use super::handler::{DynHandler, Handler, TypedHandler};
use super::task::{MergePolicy, SubStage, Task};
use crate::domain::TaskType;

/// task type が宣言した sub-stage の順序と特別な値
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubStageGraph {
    names: Vec<String>,
    initial: String,
    completed: String,
    error: String,
    cancelled: String,
    transient: HashSet<String>,
}

impl SubStageGraph {
    pub fn of<S: SubStage>() -> Self {
        Self {
            names: S::ALL.iter().map(|s| s.name()).collect(),
            initial: S::INITIAL.name(),
            completed: S::COMPLETED.name(),
            error: S::ERROR.name(),
            cancelled: S::CANCELLED.name(),
            transient: S::ALL
                .iter()
                .filter(|s| s.is_transient())
                .map(|s| s.name())
                .collect(),
        }
    }

    /// `ALL` の中での位置（未知なら None）
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn is_transient(&self, name: &str) -> bool {
        self.transient.contains(name)
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn completed(&self) -> &str {
        &self.completed
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn cancelled(&self) -> &str {
        &self.cancelled
    }
}

/// 登録済み task type 1 件分
pub struct TaskEntry {
    pub task_type: TaskType,
    pub factory_link: &'static str,
    pub graph: SubStageGraph,
    pub merge_policy: fn(&str) -> MergePolicy,

    /// merge 後の payload が `T::Payload` として読めるか
    pub check_payload: fn(&Value) -> Result<(), String>,
    pub handler: Arc<dyn DynHandler>,
}

fn check_payload<T: Task>(payload: &Value) -> Result<(), String> {
    serde_json::from_value::<T::Payload>(payload.clone())
        .map(|_| ())
        .map_err(|e| e.to_string())
}

/// TaskRegistry は `(task type, sub-stage graph, merge policy, handler)` を保持
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<Placement, _>(PlacementHandler::new(adapter))?;
///
/// let entry = registry.get("placement").unwrap();
/// ```
///
/// 起動時に組み立てて `Arc` で共有する（グローバル状態は持たない）。
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, Arc<TaskEntry>>,
}

/// RegistryError は登録時のエラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Visitor '{0}' is already registered")]
    DuplicateVisitor(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), RegistryError> {
        let task_type = T::TYPE.to_string();
        if self.entries.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        let entry = TaskEntry {
            task_type: TaskType::new(T::TYPE),
            factory_link: T::FACTORY_LINK,
            graph: SubStageGraph::of::<T::SubStage>(),
            merge_policy: T::merge_policy,
            check_payload: check_payload::<T>,
            handler: Arc::new(TypedHandler::<T, H>::new(handler)),
        };
        self.entries.insert(task_type, Arc::new(entry));
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<TaskEntry>> {
        self.entries.get(task_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.entries.keys().cloned().collect();
        types.sort();
        types
    }

    /// lineage walk が止まる root sub-stage（各 task type の初期値）
    pub fn root_sub_stages(&self) -> HashMap<TaskType, String> {
        self.entries
            .values()
            .map(|e| (e.task_type.clone(), e.graph.initial().to_string()))
            .collect()
    }
}
