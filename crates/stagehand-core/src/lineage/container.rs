//! ContainerRequestVisitor - container request の lineage を ContainerInfo にまとめる
//!
//! | task type | 完了 sub-stage | 取り出す field |
//! |---|---|---|
//! | container-allocation | COMPLETED | resourceLinks, resourceNames |
//! | placement | COMPLETED | hostSelections |
//! | reservation | COMPLETED | groupResourcePlacementLink |

use super::graph::LineageGraph;
use super::visitor::{ComponentInfo, ContainerInfo, Hop, LineageVisitor, decode_field, fold_walk};
use crate::domain::{ResourceType, StageSnapshot};
use crate::typed::Task;
use crate::workflows::{ContainerAllocation, Placement, RequestBroker, Reservation};

pub struct ContainerRequestVisitor;

const COMPLETED: &str = "COMPLETED";

const HOPS: &[Hop<ContainerInfo>] = &[
    Hop {
        task_type: ContainerAllocation::TYPE,
        completed: COMPLETED,
        extract: |mut info, s| {
            info.resource_links = info.resource_links.or_else(|| decode_field(s, "resourceLinks"));
            info.resource_names = info.resource_names.or_else(|| decode_field(s, "resourceNames"));
            info
        },
    },
    Hop {
        task_type: Placement::TYPE,
        completed: COMPLETED,
        extract: |mut info, s| {
            info.host_selections = info
                .host_selections
                .or_else(|| decode_field(s, "hostSelections"));
            info
        },
    },
    Hop {
        task_type: Reservation::TYPE,
        completed: COMPLETED,
        extract: |mut info, s| {
            info.group_resource_placement_link = info
                .group_resource_placement_link
                .or_else(|| decode_field(s, "groupResourcePlacementLink"));
            info
        },
    },
];

impl LineageVisitor for ContainerRequestVisitor {
    fn id(&self) -> &'static str {
        "container-request"
    }

    fn accepts(&self, terminal: &StageSnapshot) -> bool {
        terminal.task_type.as_str() == RequestBroker::TYPE
            && decode_field::<ResourceType>(terminal, "resourceType") == Some(ResourceType::Container)
    }

    fn visit(&self, terminal: &StageSnapshot, graph: &LineageGraph) -> ComponentInfo {
        let init = ContainerInfo {
            request_link: terminal.document_link.to_string(),
            resource_description_link: decode_field(terminal, "resourceDescriptionLink"),
            failure: terminal.failure.clone(),
            ..Default::default()
        };
        ComponentInfo::Container(fold_walk(graph, terminal, init, HOPS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureCause, TaskStage, TaskType};
    use crate::lineage::graph::fixtures::Snap;
    use crate::typed::SubStage;
    use crate::workflows::RequestSubStage;
    use serde_json::json;
    use std::collections::HashMap;

    fn roots() -> HashMap<TaskType, String> {
        [
            RequestBroker::TYPE,
            Reservation::TYPE,
            Placement::TYPE,
            ContainerAllocation::TYPE,
        ]
        .into_iter()
        .map(|t| (TaskType::new(t), RequestSubStage::INITIAL.name()))
        .collect()
    }

    /// request → reservation → placement → container allocation → request
    fn lineage() -> Vec<StageSnapshot> {
        let r0 = Snap::new("/requests/1", RequestBroker::TYPE, "CREATED", 1).build();
        let r1 = Snap::new("/requests/1", RequestBroker::TYPE, "RESERVING", 2).after(&r0).build();
        let v0 = Snap::new("/request/reservation-tasks/1", Reservation::TYPE, "CREATED", 3)
            .after(&r1)
            .build();
        let v1 = Snap::new("/request/reservation-tasks/1", Reservation::TYPE, "PLACEMENT", 4)
            .payload(json!({ "groupResourcePlacementLink": "/placements/partial" }))
            .after(&v0)
            .build();
        let p0 = Snap::new("/request/placement-tasks/1", Placement::TYPE, "CREATED", 5)
            .after(&v1)
            .build();
        let p1 = Snap::new("/request/placement-tasks/1", Placement::TYPE, "COMPLETED", 6)
            .stage(TaskStage::Finished)
            .payload(json!({ "hostSelections": [
                { "hostLink": "/hosts/1", "resourcePoolLink": "/pools/1" }
            ]}))
            .after(&p0)
            .build();
        let v2 = Snap::new("/request/reservation-tasks/1", Reservation::TYPE, "COMPLETED", 7)
            .stage(TaskStage::Finished)
            .payload(json!({ "groupResourcePlacementLink": "/placements/1" }))
            .after(&p1)
            .build();
        let a0 = Snap::new("/request/container-allocation-tasks/1", ContainerAllocation::TYPE, "CREATED", 8)
            .after(&v2)
            .build();
        let a1 = Snap::new("/request/container-allocation-tasks/1", ContainerAllocation::TYPE, "COMPLETED", 9)
            .stage(TaskStage::Finished)
            .payload(json!({
                "resourceLinks": ["/containers/web-1"],
                "resourceNames": ["web-mcm1"],
            }))
            .after(&a0)
            .build();
        let r2 = Snap::new("/requests/1", RequestBroker::TYPE, "COMPLETED", 10)
            .stage(TaskStage::Finished)
            .payload(json!({
                "resourceType": "CONTAINER",
                "resourceDescriptionLink": "/descriptions/web",
            }))
            .after(&a1)
            .build();
        vec![r0, r1, v0, v1, p0, p1, v2, a0, a1, r2]
    }

    fn container(info: ComponentInfo) -> ContainerInfo {
        match info {
            ComponentInfo::Container(info) => info,
            other => panic!("expected container info, got {other:?}"),
        }
    }

    #[test]
    fn intact_chain_populates_every_field() {
        let snapshots = lineage();
        let terminal = snapshots[9].clone();
        let graph = LineageGraph::new(snapshots, roots());

        let visitor = ContainerRequestVisitor;
        assert!(visitor.accepts(&terminal));
        let info = container(visitor.visit(&terminal, &graph));

        assert_eq!(info.request_link, "/requests/1");
        assert_eq!(info.resource_description_link.as_deref(), Some("/descriptions/web"));
        assert_eq!(info.resource_links, Some(vec!["/containers/web-1".to_string()]));
        assert_eq!(info.resource_names, Some(vec!["web-mcm1".to_string()]));
        assert_eq!(info.host_selections.map(|h| h.len()), Some(1));
        // Only the reservation's COMPLETED version is read, not its PLACEMENT one.
        assert_eq!(info.group_resource_placement_link.as_deref(), Some("/placements/1"));
        assert_eq!(info.failure, None);
    }

    #[test]
    fn purged_hop_leaves_fields_unset() {
        let snapshots: Vec<_> = lineage()
            .into_iter()
            .filter(|s| s.document_link.as_str() != "/request/reservation-tasks/1")
            .collect();
        let terminal = snapshots.last().cloned().unwrap();
        let graph = LineageGraph::new(snapshots, roots());

        let info = container(ContainerRequestVisitor.visit(&terminal, &graph));
        assert!(info.resource_links.is_some());
        assert_eq!(info.host_selections, None);
        assert_eq!(info.group_resource_placement_link, None);
    }

    #[test]
    fn failed_request_reports_its_cause() {
        let mut snapshots = lineage();
        let terminal = snapshots.pop().unwrap();
        let failed = StageSnapshot {
            stage: TaskStage::Failed,
            sub_stage: "ERROR".into(),
            failure: Some(FailureCause::new("no capacity")),
            ..terminal
        };
        snapshots.push(failed.clone());
        let graph = LineageGraph::new(snapshots, roots());

        let info = container(ContainerRequestVisitor.visit(&failed, &graph));
        assert_eq!(info.failure.map(|f| f.message), Some("no capacity".to_string()));
    }

    #[test]
    fn network_requests_are_not_accepted() {
        let terminal = Snap::new("/requests/2", RequestBroker::TYPE, "COMPLETED", 1)
            .payload(json!({ "resourceType": "NETWORK" }))
            .build();
        assert!(!ContainerRequestVisitor.accepts(&terminal));
    }
}
