//! Workflows - provisioning request の参照実装
//!
//! ```text
//! request-broker
//!  ├─ reservation ── placement          (container)
//!  ├─ container-allocation              (container)
//!  └─ network-allocation ── cidr pool   (network)
//! ```
//!
//! 各 task は自分の sub-stage だけを知っていて、子の完了は callback 経由で
//! 親の sub-stage 遷移として届く。

pub mod container_allocation;
pub mod network_allocation;
pub mod placement;
pub mod request;
pub mod reservation;

use std::sync::Arc;

pub use self::container_allocation::{
    ContainerAllocation, ContainerAllocationHandler, ContainerAllocationPayload,
    ContainerAllocationSubStage,
};
pub use self::network_allocation::{
    NetworkAllocation, NetworkAllocationHandler, NetworkAllocationPayload,
    NetworkAllocationSubStage,
};
pub use self::placement::{Placement, PlacementHandler, PlacementPayload, PlacementSubStage};
pub use self::request::{RequestBroker, RequestBrokerHandler, RequestPayload, RequestSubStage};
pub use self::reservation::{
    Reservation, ReservationHandler, ReservationPayload, ReservationSubStage,
};

use crate::allocation::AllocationService;
use crate::app::ControlPlaneBuilder;
use crate::lineage::{ContainerRequestVisitor, NetworkRequestVisitor};
use crate::ports::ProvisioningAdapter;
use crate::typed::{RegistryError, Task};

/// `register_reference_workflows` が登録する task type
pub const REFERENCE_TASK_TYPES: &[&str] = &[
    RequestBroker::TYPE,
    Reservation::TYPE,
    Placement::TYPE,
    ContainerAllocation::TYPE,
    NetworkAllocation::TYPE,
];

/// 5 つの handler と container / network の lineage visitor を登録する
pub fn register_reference_workflows(
    builder: ControlPlaneBuilder,
    adapter: Arc<dyn ProvisioningAdapter>,
    allocations: Arc<AllocationService>,
) -> Result<ControlPlaneBuilder, RegistryError> {
    builder
        .register::<RequestBroker, _>(RequestBrokerHandler)?
        .register::<Reservation, _>(ReservationHandler::new(adapter.clone()))?
        .register::<Placement, _>(PlacementHandler::new(adapter.clone()))?
        .register::<ContainerAllocation, _>(ContainerAllocationHandler::new(adapter.clone()))?
        .register::<NetworkAllocation, _>(NetworkAllocationHandler::new(adapter, allocations))?
        .register_visitor(Arc::new(ContainerRequestVisitor))?
        .register_visitor(Arc::new(NetworkRequestVisitor))
}

/// Last segment of a description link, used as the base resource name.
pub fn resource_name(link: &str) -> String {
    match link.trim_end_matches('/').rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "resource".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{ConflictRetry, ControlPlane, StartRequest};
    use crate::allocation::PoolSpec;
    use crate::domain::{DocumentLink, ResourceType, TaskStage, TaskType};
    use crate::impls::{AdapterOperation, InMemoryAdapter, InMemoryDocumentStore};
    use crate::lineage::{ComponentInfo, ContainerInfo, NetworkInfo};
    use crate::ports::{DocumentStore, SystemClock};
    use rstest::rstest;
    use std::time::Duration;

    const DESCRIPTION: &str = "/resources/container-descriptions/web";
    const POOL: &str = "/resources/subnet-pools/default";

    struct Env {
        control_plane: ControlPlane,
        adapter: Arc<InMemoryAdapter>,
        allocations: Arc<AllocationService>,
        store: Arc<dyn DocumentStore>,
    }

    fn env(hosts: usize) -> Env {
        let store: Arc<dyn DocumentStore> =
            Arc::new(InMemoryDocumentStore::new(Arc::new(SystemClock)));
        let adapter = Arc::new(InMemoryAdapter::single_pool(hosts));
        let allocations = Arc::new(AllocationService::new(store.clone(), ConflictRetry::default()));

        let control_plane = register_reference_workflows(
            ControlPlaneBuilder::new(store.clone()),
            adapter.clone(),
            allocations.clone(),
        )
        .unwrap()
        .expect_tasks(REFERENCE_TASK_TYPES)
        .build()
        .unwrap();

        Env {
            control_plane,
            adapter,
            allocations,
            store,
        }
    }

    impl Env {
        async fn run(&self, payload: RequestPayload) -> (DocumentLink, TaskStage) {
            let runtime = &self.control_plane.runtime;
            let link = runtime
                .start(StartRequest::<RequestBroker>::new(payload))
                .await
                .unwrap();
            let done = runtime
                .wait_for_terminal(&link, Duration::from_secs(5))
                .await
                .unwrap();
            (link, done.stage)
        }

        async fn container_info(&self, link: &DocumentLink) -> ContainerInfo {
            let infos = self.control_plane.lineage.query(link).await.unwrap();
            match infos.as_slice() {
                [ComponentInfo::Container(info)] => info.clone(),
                other => panic!("expected one container info, got {other:?}"),
            }
        }

        async fn network_info(&self, link: &DocumentLink) -> NetworkInfo {
            let infos = self.control_plane.lineage.query(link).await.unwrap();
            match infos.as_slice() {
                [ComponentInfo::Network(info)] => info.clone(),
                other => panic!("expected one network info, got {other:?}"),
            }
        }

        async fn only_link_of(&self, task_type: &str) -> DocumentLink {
            let docs = self
                .store
                .list(Some(&TaskType::new(task_type)))
                .await
                .unwrap();
            assert_eq!(docs.len(), 1, "{task_type}");
            docs[0].document_link.clone()
        }

        async fn pool(&self) -> DocumentLink {
            self.allocations
                .create_pool(PoolSpec {
                    pool_link: POOL.into(),
                    network_cidr: "10.0.0.0/16".into(),
                    prefix_length: 24,
                })
                .await
                .unwrap()
        }
    }

    #[rstest]
    #[case("/resources/container-descriptions/web", "web")]
    #[case("/resources/container-descriptions/web/", "web")]
    #[case("db", "db")]
    #[case("", "resource")]
    #[case("/", "resource")]
    fn test_resource_name(#[case] link: &str, #[case] expected: &str) {
        assert_eq!(resource_name(link), expected);
    }

    #[tokio::test]
    async fn container_request_lineage_is_fully_populated() {
        let env = env(3);
        let (link, stage) = env.run(RequestPayload::containers(DESCRIPTION, 2)).await;
        assert_eq!(stage, TaskStage::Finished);

        let info = env.container_info(&link).await;
        assert_eq!(info.request_link, link.to_string());
        assert_eq!(info.resource_description_link.as_deref(), Some(DESCRIPTION));
        assert_eq!(
            info.resource_names,
            Some(vec!["web-mcm1".to_string(), "web-mcm2".to_string()])
        );
        assert_eq!(info.resource_links.as_ref().map(Vec::len), Some(2));
        assert_eq!(info.host_selections.as_ref().map(Vec::len), Some(2));
        assert_eq!(
            info.group_resource_placement_link.as_deref(),
            Some("/resources/group-placements/default")
        );
        assert!(info.failure.is_none());

        // The request carries the allocated links too.
        let request = env
            .control_plane
            .runtime
            .get::<RequestBroker>(&link)
            .await
            .unwrap();
        assert_eq!(request.payload.resource_links, info.resource_links);
    }

    #[tokio::test]
    async fn purged_placement_leaves_partial_lineage() {
        let env = env(2);
        let (link, _) = env.run(RequestPayload::containers(DESCRIPTION, 2)).await;

        let placement = env.only_link_of(Placement::TYPE).await;
        assert!(env.store.purge(&placement).await.unwrap());

        let info = env.container_info(&link).await;
        assert_eq!(info.resource_links.as_ref().map(Vec::len), Some(2));
        assert!(info.group_resource_placement_link.is_some());
        assert!(info.host_selections.is_none());
    }

    #[tokio::test]
    async fn provisioning_failure_fails_the_request() {
        let env = env(2);
        env.adapter.fail_on(AdapterOperation::ProvisionContainer);

        let (link, stage) = env.run(RequestPayload::containers(DESCRIPTION, 1)).await;
        assert_eq!(stage, TaskStage::Failed);

        let doc = env.control_plane.runtime.document(&link).await.unwrap();
        assert_eq!(doc.sub_stage, "ERROR");
        let failure = doc.failure.expect("failure cause");
        assert!(failure.message.contains("ProvisionContainer"), "{}", failure.message);

        let info = env.container_info(&link).await;
        assert_eq!(info.failure, Some(failure));
        assert!(info.resource_links.is_none());
    }

    #[tokio::test]
    async fn zero_count_request_fails_without_children() {
        let env = env(1);
        let (_, stage) = env.run(RequestPayload::containers(DESCRIPTION, 0)).await;
        assert_eq!(stage, TaskStage::Failed);
        assert!(env
            .store
            .list(Some(&TaskType::new(Reservation::TYPE)))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn network_request_allocates_a_subnet() {
        let env = env(1);
        let pool = env.pool().await;

        let (link, stage) = env
            .run(RequestPayload::network("/resources/network-descriptions/backend", pool.as_str()))
            .await;
        assert_eq!(stage, TaskStage::Finished);

        let info = env.network_info(&link).await;
        assert_eq!(info.subnet_cidr.as_deref(), Some("10.0.0.0/24"));
        assert_eq!(info.cidr_allocation_link.as_deref(), Some(pool.as_str()));
        assert_eq!(info.resource_links.as_ref().map(Vec::len), Some(1));

        let allocation = env.only_link_of(NetworkAllocation::TYPE).await;
        let state = env.allocations.state(&pool).await.unwrap();
        assert_eq!(state.assigned_to(allocation.as_str()), Some("10.0.0.0/24"));
    }

    #[tokio::test]
    async fn network_provisioning_failure_releases_the_subnet() {
        let env = env(1);
        let pool = env.pool().await;
        env.adapter.fail_on(AdapterOperation::ProvisionNetwork);

        let (link, stage) = env
            .run(RequestPayload::network("/resources/network-descriptions/backend", pool.as_str()))
            .await;
        assert_eq!(stage, TaskStage::Failed);
        assert!(env.allocations.state(&pool).await.unwrap().assigned.is_empty());

        let info = env.network_info(&link).await;
        assert!(info.failure.is_some());
        assert!(info.resource_links.is_none());
    }

    #[tokio::test]
    async fn request_graph_and_query_all() {
        let env = env(2);
        let (first, _) = env.run(RequestPayload::containers(DESCRIPTION, 1)).await;
        let (second, _) = env.run(RequestPayload::containers(DESCRIPTION, 2)).await;

        let graph = env.control_plane.lineage.request_graph(&second).await.unwrap();
        assert_eq!(graph.request.document_link, second);
        let mut types: Vec<&str> = graph.tasks.iter().map(|t| t.task_type.as_str()).collect();
        types.sort_unstable();
        assert_eq!(
            types,
            vec![
                ContainerAllocation::TYPE,
                Placement::TYPE,
                RequestBroker::TYPE,
                Reservation::TYPE,
            ]
        );
        // the first request's tasks are not part of this lineage
        assert!(graph.tasks.iter().all(|t| t.document_link != first));
        assert!(graph.tasks.iter().all(|t| !t.stages.is_empty()));
        assert_eq!(graph.component_infos.len(), 1);

        let all = env
            .control_plane
            .lineage
            .query_all(ResourceType::Container)
            .await
            .unwrap();
        let links: Vec<&str> = all.iter().map(ComponentInfo::request_link).collect();
        assert_eq!(links, vec![second.as_str(), first.as_str()]);
        assert!(env
            .control_plane
            .lineage
            .query_all(ResourceType::Network)
            .await
            .unwrap()
            .is_empty());
    }
}
