//! LineageGraph - snapshot index と後ろ向きの walk
//!
//! # 学習ポイント
//! - `HashMap<SnapshotKey, StageSnapshot>` による O(1) の逆引き
//! - 借用を返す Iterator（`Walk<'a>`）
//!
//! walk は index を書き換えない。消えた snapshot に当たったら黙って止まる。

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::{DocumentLink, SnapshotKey, StageSnapshot, TaskType};

/// 全 document の snapshot を key で引ける index
pub struct LineageGraph {
    index: HashMap<SnapshotKey, StageSnapshot>,
    roots: HashMap<TaskType, String>,
}

impl LineageGraph {
    /// `roots` は task type ごとの root sub-stage（登録済み task の初期値）
    pub fn new(
        snapshots: impl IntoIterator<Item = StageSnapshot>,
        roots: HashMap<TaskType, String>,
    ) -> Self {
        let index = snapshots.into_iter().map(|s| (s.key(), s)).collect();
        Self { index, roots }
    }

    pub fn get(&self, key: &SnapshotKey) -> Option<&StageSnapshot> {
        self.index.get(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &StageSnapshot> {
        self.index.values()
    }

    /// transition source を持たない、task type の root sub-stage の snapshot
    pub fn is_root(&self, snapshot: &StageSnapshot) -> bool {
        snapshot.transition_source.is_none()
            && self
                .roots
                .get(&snapshot.task_type)
                .is_some_and(|root| root == &snapshot.sub_stage)
    }

    /// `start` から transition source を辿る（`start` 自身を含む、root は含まない）
    pub fn walk<'a>(&'a self, start: &'a StageSnapshot) -> Walk<'a> {
        Walk {
            graph: self,
            next: Some(start),
            seen: HashSet::new(),
        }
    }

    /// document ごとの snapshot 履歴（update time 昇順）
    pub fn histories(&self) -> BTreeMap<&DocumentLink, Vec<&StageSnapshot>> {
        let mut histories: BTreeMap<&DocumentLink, Vec<&StageSnapshot>> = BTreeMap::new();
        for snapshot in self.index.values() {
            histories
                .entry(&snapshot.document_link)
                .or_default()
                .push(snapshot);
        }
        for history in histories.values_mut() {
            history.sort_by_key(|s| s.update_time_micros);
        }
        histories
    }

    pub fn latest(&self, link: &DocumentLink) -> Option<&StageSnapshot> {
        self.index
            .values()
            .filter(|s| &s.document_link == link)
            .max_by_key(|s| s.update_time_micros)
    }
}

/// 後ろ向きの walk
///
/// 止まる条件：
/// - root snapshot に到達
/// - transition source が index にない（purge 済み）
/// - 既に通った snapshot（壊れたデータでも必ず止まる）
pub struct Walk<'a> {
    graph: &'a LineageGraph,
    next: Option<&'a StageSnapshot>,
    seen: HashSet<SnapshotKey>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a StageSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if self.graph.is_root(current) || !self.seen.insert(current.key()) {
            return None;
        }
        self.next = current
            .transition_source
            .as_ref()
            .and_then(|source| self.graph.get(&source.key()));
        Some(current)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::BTreeMap;

    use serde_json::Value;

    use crate::domain::{DocumentLink, StageSnapshot, TaskStage, TaskType, TransitionSource};

    /// Snapshot builder for lineage tests.
    pub struct Snap(StageSnapshot);

    impl Snap {
        pub fn new(link: &str, task_type: &str, sub_stage: &str, micros: u64) -> Self {
            Self(StageSnapshot {
                document_link: DocumentLink::new(link),
                task_type: TaskType::new(task_type),
                stage: TaskStage::Started,
                sub_stage: sub_stage.to_string(),
                update_time_micros: micros,
                version: 1,
                payload: Value::Object(Default::default()),
                failure: None,
                custom_properties: BTreeMap::new(),
                transition_source: None,
            })
        }

        pub fn stage(mut self, stage: TaskStage) -> Self {
            self.0.stage = stage;
            self
        }

        pub fn payload(mut self, payload: Value) -> Self {
            self.0.payload = payload;
            self
        }

        pub fn after(mut self, source: &StageSnapshot) -> Self {
            self.0.transition_source = Some(source.as_source());
            self
        }

        pub fn after_missing(mut self, link: &str, sub_stage: &str, micros: u64) -> Self {
            self.0.transition_source = Some(TransitionSource {
                document_link: DocumentLink::new(link),
                sub_stage: sub_stage.to_string(),
                update_time_micros: micros,
            });
            self
        }

        pub fn build(self) -> StageSnapshot {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::Snap;
    use super::*;

    fn roots() -> HashMap<TaskType, String> {
        [("parent", "CREATED"), ("child", "CREATED")]
            .into_iter()
            .map(|(t, s)| (TaskType::new(t), s.to_string()))
            .collect()
    }

    /// parent CREATED → parent WAITING → child CREATED → child COMPLETED → parent DONE
    fn chain() -> Vec<StageSnapshot> {
        let p0 = Snap::new("/p/1", "parent", "CREATED", 1).build();
        let p1 = Snap::new("/p/1", "parent", "WAITING", 2).after(&p0).build();
        let c0 = Snap::new("/c/1", "child", "CREATED", 3).after(&p1).build();
        let c1 = Snap::new("/c/1", "child", "COMPLETED", 4).after(&c0).build();
        let p2 = Snap::new("/p/1", "parent", "DONE", 5).after(&c1).build();
        vec![p0, p1, c0, c1, p2]
    }

    fn keys<'a>(walk: impl Iterator<Item = &'a StageSnapshot>) -> Vec<String> {
        walk.map(|s| format!("{}:{}", s.document_link, s.sub_stage))
            .collect()
    }

    #[test]
    fn walk_crosses_documents_and_stops_at_root() {
        let snapshots = chain();
        let graph = LineageGraph::new(snapshots.clone(), roots());
        let walked = keys(graph.walk(&snapshots[4]));
        assert_eq!(
            walked,
            vec!["/p/1:DONE", "/c/1:COMPLETED", "/c/1:CREATED", "/p/1:WAITING"]
        );
    }

    #[test]
    fn walk_stops_at_purged_source() {
        let snapshots: Vec<_> = chain()
            .into_iter()
            .filter(|s| s.document_link.as_str() != "/c/1")
            .collect();
        let graph = LineageGraph::new(snapshots.clone(), roots());
        let terminal = graph.latest(&DocumentLink::new("/p/1")).unwrap();
        assert_eq!(keys(graph.walk(terminal)), vec!["/p/1:DONE"]);
    }

    #[test]
    fn snapshot_without_source_outside_root_is_visited_once() {
        let lone = Snap::new("/p/2", "parent", "WAITING", 7)
            .after_missing("/gone/1", "COMPLETED", 6)
            .build();
        let graph = LineageGraph::new(vec![lone.clone()], roots());
        assert_eq!(keys(graph.walk(&lone)), vec!["/p/2:WAITING"]);
    }

    #[test]
    fn walk_terminates_on_cycles() {
        let a = Snap::new("/x/1", "parent", "A", 2)
            .after_missing("/x/1", "B", 3)
            .build();
        let b = Snap::new("/x/1", "parent", "B", 3).after(&a).build();
        let graph = LineageGraph::new(vec![a, b.clone()], roots());
        assert_eq!(keys(graph.walk(&b)), vec!["/x/1:B", "/x/1:A"]);
    }

    #[test]
    fn histories_are_grouped_and_ordered() {
        let graph = LineageGraph::new(chain(), roots());
        let histories = graph.histories();
        assert_eq!(histories.len(), 2);

        let parent: Vec<_> = histories[&DocumentLink::new("/p/1")]
            .iter()
            .map(|s| s.sub_stage.as_str())
            .collect();
        assert_eq!(parent, vec!["CREATED", "WAITING", "DONE"]);
        assert_eq!(
            graph.latest(&DocumentLink::new("/c/1")).map(|s| s.sub_stage.as_str()),
            Some("COMPLETED")
        );
    }
}
