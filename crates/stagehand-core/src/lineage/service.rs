//! LineageService - store 全体の snapshot から lineage を組み立てる
//!
//! クエリのたびに全 snapshot を読み、index を作り直す（index は共有しない）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use super::graph::LineageGraph;
use super::visitor::{ComponentInfo, VisitorRegistry};
use crate::domain::{DocumentLink, ResourceType, StageSnapshot, TaskError, TaskType};
use crate::ports::{DocumentStore, SnapshotQuery};

/// 1 document の snapshot 履歴
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHistory {
    pub document_link: DocumentLink,
    pub task_type: TaskType,
    pub stages: Vec<StageSnapshot>,
}

/// request を起点にした task の履歴と visitor の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestGraph {
    pub request: StageSnapshot,
    pub tasks: Vec<TaskHistory>,
    pub component_infos: Vec<ComponentInfo>,
}

#[derive(Clone)]
pub struct LineageService {
    store: Arc<dyn DocumentStore>,
    visitors: Arc<VisitorRegistry>,
    roots: Arc<HashMap<TaskType, String>>,
}

impl LineageService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        visitors: Arc<VisitorRegistry>,
        roots: HashMap<TaskType, String>,
    ) -> Self {
        Self {
            store,
            visitors,
            roots: Arc::new(roots),
        }
    }

    /// 登録済み task type の snapshot だけを読む。
    ///
    /// allocation pool のような長寿命 document の履歴は lineage に現れない。
    pub async fn graph(&self) -> Result<LineageGraph, TaskError> {
        let query = SnapshotQuery::all().of_types(self.roots.keys().cloned());
        let snapshots = self.store.snapshots(&query).await?;
        Ok(LineageGraph::new(snapshots, (*self.roots).clone()))
    }

    fn visit(&self, terminal: &StageSnapshot, graph: &LineageGraph) -> Vec<ComponentInfo> {
        self.visitors
            .accepting(terminal)
            .map(|visitor| visitor.visit(terminal, graph))
            .collect()
    }

    /// link の最新 snapshot を受け入れる visitor の結果
    pub async fn query(&self, link: &DocumentLink) -> Result<Vec<ComponentInfo>, TaskError> {
        let graph = self.graph().await?;
        let latest = graph
            .latest(link)
            .ok_or_else(|| TaskError::NotFound(link.clone()))?;
        Ok(self.visit(latest, &graph))
    }

    /// resource type の終端 request すべて（新しい順）
    pub async fn query_all(
        &self,
        resource_type: ResourceType,
    ) -> Result<Vec<ComponentInfo>, TaskError> {
        let graph = self.graph().await?;
        let mut terminals: Vec<&StageSnapshot> =
            graph.snapshots().filter(|s| s.is_terminal()).collect();
        terminals.sort_by(|a, b| b.update_time_micros.cmp(&a.update_time_micros));

        Ok(terminals
            .into_iter()
            .flat_map(|terminal| self.visit(terminal, &graph))
            .filter(|info| info.resource_type() == resource_type)
            .collect())
    }

    /// request の最新状態、lineage 上の全 task の履歴、visitor の結果
    ///
    /// task は最初の snapshot の時刻順。purge された task は含まれない。
    pub async fn request_graph(&self, link: &DocumentLink) -> Result<RequestGraph, TaskError> {
        let graph = self.graph().await?;
        let request = graph
            .latest(link)
            .ok_or_else(|| TaskError::NotFound(link.clone()))?;

        let mut involved: HashSet<&DocumentLink> =
            graph.walk(request).map(|s| &s.document_link).collect();
        involved.insert(link);

        let histories = graph.histories();
        let mut tasks: Vec<TaskHistory> = histories
            .into_iter()
            .filter(|(doc, _)| involved.contains(doc))
            .filter_map(|(doc, stages)| {
                let first = stages.first()?;
                Some(TaskHistory {
                    document_link: doc.clone(),
                    task_type: first.task_type.clone(),
                    stages: stages.into_iter().cloned().collect(),
                })
            })
            .collect();
        tasks.sort_by_key(|t| t.stages.first().map(|s| s.update_time_micros));

        Ok(RequestGraph {
            request: request.clone(),
            component_infos: self.visit(request, &graph),
            tasks,
        })
    }
}
