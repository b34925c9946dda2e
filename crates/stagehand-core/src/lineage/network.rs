use super::graph::LineageGraph;
use super::visitor::{ComponentInfo, Hop, LineageVisitor, NetworkInfo, decode_field, fold_walk};
use crate::domain::{ResourceType, StageSnapshot};
use crate::typed::Task;
use crate::workflows::{NetworkAllocation, RequestBroker};

/// Network request lineage: the network allocation task carries everything.
pub struct NetworkRequestVisitor;

const HOPS: &[Hop<NetworkInfo>] = &[Hop {
    task_type: NetworkAllocation::TYPE,
    completed: "COMPLETED",
    extract: |mut info, s| {
        info.resource_links = info.resource_links.or_else(|| decode_field(s, "resourceLinks"));
        info.subnet_cidr = info.subnet_cidr.or_else(|| decode_field(s, "subnetCidr"));
        info.cidr_allocation_link = info
            .cidr_allocation_link
            .or_else(|| decode_field(s, "cidrAllocationLink"));
        info
    },
}];

impl LineageVisitor for NetworkRequestVisitor {
    fn id(&self) -> &'static str {
        "network-request"
    }

    fn accepts(&self, terminal: &StageSnapshot) -> bool {
        terminal.task_type.as_str() == RequestBroker::TYPE
            && decode_field::<ResourceType>(terminal, "resourceType") == Some(ResourceType::Network)
    }

    fn visit(&self, terminal: &StageSnapshot, graph: &LineageGraph) -> ComponentInfo {
        let init = NetworkInfo {
            request_link: terminal.document_link.to_string(),
            resource_description_link: decode_field(terminal, "resourceDescriptionLink"),
            failure: terminal.failure.clone(),
            ..Default::default()
        };
        ComponentInfo::Network(fold_walk(graph, terminal, init, HOPS))
    }
}
