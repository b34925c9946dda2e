//! LineageVisitor - resource type ごとの lineage 解釈
//!
//! visitor は終端 snapshot から walk を辿り、自分の知っている task type の
//! 完了 snapshot から field を取り出して ComponentInfo を組み立てる。
//! 蓄積は純粋な fold（visitor 自身は状態を持たない）。

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::graph::LineageGraph;
use crate::domain::{FailureCause, HostSelection, ResourceType, StageSnapshot};
use crate::typed::RegistryError;

/// 終端 snapshot を受け入れるかを判定し、lineage から結果を組み立てる
pub trait LineageVisitor: Send + Sync {
    fn id(&self) -> &'static str;

    fn accepts(&self, terminal: &StageSnapshot) -> bool;

    fn visit(&self, terminal: &StageSnapshot, graph: &LineageGraph) -> ComponentInfo;
}

/// Visitor の結果。walk が途中で切れていれば field は未設定のまま。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentInfo {
    Container(ContainerInfo),
    Network(NetworkInfo),
}

impl ComponentInfo {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ComponentInfo::Container(_) => ResourceType::Container,
            ComponentInfo::Network(_) => ResourceType::Network,
        }
    }

    pub fn request_link(&self) -> &str {
        match self {
            ComponentInfo::Container(info) => &info.request_link,
            ComponentInfo::Network(info) => &info.request_link,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    pub request_link: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_description_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_links: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_names: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_selections: Option<Vec<HostSelection>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_resource_placement_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub request_link: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_description_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_links: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_allocation_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureCause>,
}

/// walk 上で意味のある 1 hop: task type の完了 sub-stage と取り出し関数
pub struct Hop<A> {
    pub task_type: &'static str,
    pub completed: &'static str,
    pub extract: fn(A, &StageSnapshot) -> A,
}

/// walk を辿り、表にある hop だけ `extract` を適用する
pub fn fold_walk<A>(
    graph: &LineageGraph,
    terminal: &StageSnapshot,
    init: A,
    hops: &[Hop<A>],
) -> A {
    graph.walk(terminal).fold(init, |acc, snapshot| {
        let hop = hops.iter().find(|hop| {
            hop.task_type == snapshot.task_type.as_str() && hop.completed == snapshot.sub_stage
        });
        match hop {
            Some(hop) => (hop.extract)(acc, snapshot),
            None => acc,
        }
    })
}

/// payload の field を型付きで読む（欠落・型違いは None）
pub(crate) fn decode_field<T: DeserializeOwned>(snapshot: &StageSnapshot, name: &str) -> Option<T> {
    snapshot
        .field(name)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

/// visitor の登録先（id の重複は拒否）
#[derive(Default, Clone)]
pub struct VisitorRegistry {
    visitors: Vec<Arc<dyn LineageVisitor>>,
}

impl VisitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, visitor: Arc<dyn LineageVisitor>) -> Result<(), RegistryError> {
        if self.visitors.iter().any(|v| v.id() == visitor.id()) {
            return Err(RegistryError::DuplicateVisitor(visitor.id().to_string()));
        }
        self.visitors.push(visitor);
        Ok(())
    }

    pub fn accepting<'a>(
        &'a self,
        terminal: &'a StageSnapshot,
    ) -> impl Iterator<Item = &'a Arc<dyn LineageVisitor>> + 'a {
        self.visitors.iter().filter(move |v| v.accepts(terminal))
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.visitors.iter().map(|v| v.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }
}
