//! Request broker - 1 件の provisioning request の root task
//!
//! - container: RESERVING（reservation）→ ALLOCATING（container allocation）
//! - network: ALLOCATING（network allocation）のみ

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::container_allocation::{ContainerAllocation, ContainerAllocationPayload};
use super::network_allocation::{NetworkAllocation, NetworkAllocationPayload};
use super::reservation::{Reservation, ReservationPayload};
use crate::domain::{HandlerError, HostSelection, ResourceType};
use crate::typed::{Handler, MergePolicy, Step, SubStage, Task, TaskContext, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestSubStage {
    Created,
    Reserving,
    Reserved,
    Allocating,
    Allocated,
    Completed,
    Error,
    Cancelled,
}

impl SubStage for RequestSubStage {
    const ALL: &'static [Self] = &[
        Self::Created,
        Self::Reserving,
        Self::Reserved,
        Self::Allocating,
        Self::Allocated,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];
    const INITIAL: Self = Self::Created;
    const COMPLETED: Self = Self::Completed;
    const ERROR: Self = Self::Error;
    const CANCELLED: Self = Self::Cancelled;

    fn is_transient(self) -> bool {
        matches!(self, Self::Reserving | Self::Allocating)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    #[serde(default)]
    pub resource_type: ResourceType,

    #[serde(default)]
    pub resource_description_link: String,

    #[serde(default)]
    pub resource_count: u32,

    /// network request が subnet を取る allocation pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr_allocation_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_resource_placement_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_selections: Option<Vec<HostSelection>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_links: Option<Vec<String>>,
}

impl RequestPayload {
    pub fn containers(resource_description_link: impl Into<String>, resource_count: u32) -> Self {
        Self {
            resource_type: ResourceType::Container,
            resource_description_link: resource_description_link.into(),
            resource_count,
            ..Default::default()
        }
    }

    pub fn network(
        resource_description_link: impl Into<String>,
        cidr_allocation_link: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: ResourceType::Network,
            resource_description_link: resource_description_link.into(),
            resource_count: 1,
            cidr_allocation_link: Some(cidr_allocation_link.into()),
            ..Default::default()
        }
    }
}

pub struct RequestBroker;

impl Task for RequestBroker {
    const TYPE: &'static str = "request-broker";
    const FACTORY_LINK: &'static str = "/requests";
    type SubStage = RequestSubStage;
    type Payload = RequestPayload;

    fn merge_policy(field: &str) -> MergePolicy {
        match field {
            "resourceType" | "resourceDescriptionLink" => MergePolicy::OnlyIfAbsent,
            _ => MergePolicy::Overwrite,
        }
    }
}

pub struct RequestBrokerHandler;

#[async_trait]
impl Handler<RequestBroker> for RequestBrokerHandler {
    async fn handle(
        &self,
        ctx: &TaskContext<RequestBroker>,
        state: &TaskState<RequestBroker>,
    ) -> Result<Step<RequestBroker>, HandlerError> {
        let request = &state.payload;
        match state.sub_stage {
            RequestSubStage::Created => {
                if request.resource_count == 0 {
                    return Ok(Step::fail("resource count must be positive"));
                }
                Ok(match request.resource_type {
                    ResourceType::Container => Step::proceed(RequestSubStage::Reserving),
                    ResourceType::Network => Step::proceed(RequestSubStage::Allocating),
                })
            }
            RequestSubStage::Reserving => {
                let reservation = ReservationPayload {
                    resource_description_link: request.resource_description_link.clone(),
                    resource_count: request.resource_count,
                    ..Default::default()
                };
                ctx.spawn_child::<Reservation>(
                    reservation,
                    RequestSubStage::Reserved,
                    RequestSubStage::Error,
                )
                .await?;
                Ok(Step::Await)
            }
            RequestSubStage::Reserved => {
                let reservation = ctx.load_source::<Reservation>().await?;
                let mut payload = request.clone();
                payload.group_resource_placement_link =
                    reservation.payload.group_resource_placement_link;
                payload.host_selections = reservation.payload.host_selections;
                Ok(Step::proceed_with(RequestSubStage::Allocating, payload))
            }
            RequestSubStage::Allocating => {
                match request.resource_type {
                    ResourceType::Container => {
                        let allocation = ContainerAllocationPayload {
                            resource_description_link: request.resource_description_link.clone(),
                            resource_count: request.resource_count,
                            group_resource_placement_link: request
                                .group_resource_placement_link
                                .clone(),
                            host_selections: request.host_selections.clone().unwrap_or_default(),
                            ..Default::default()
                        };
                        ctx.spawn_child::<ContainerAllocation>(
                            allocation,
                            RequestSubStage::Allocated,
                            RequestSubStage::Error,
                        )
                        .await?;
                    }
                    ResourceType::Network => {
                        let pool = request.cidr_allocation_link.clone().ok_or_else(|| {
                            HandlerError::new("network request has no cidr allocation link")
                        })?;
                        let allocation = NetworkAllocationPayload {
                            cidr_allocation_link: pool,
                            resource_description_link: request.resource_description_link.clone(),
                            ..Default::default()
                        };
                        ctx.spawn_child::<NetworkAllocation>(
                            allocation,
                            RequestSubStage::Allocated,
                            RequestSubStage::Error,
                        )
                        .await?;
                    }
                }
                Ok(Step::Await)
            }
            RequestSubStage::Allocated => {
                let resource_links = match request.resource_type {
                    ResourceType::Container => {
                        ctx.load_source::<ContainerAllocation>()
                            .await?
                            .payload
                            .resource_links
                    }
                    ResourceType::Network => {
                        ctx.load_source::<NetworkAllocation>()
                            .await?
                            .payload
                            .resource_links
                    }
                };
                let mut payload = request.clone();
                payload.resource_links = resource_links;
                Ok(Step::complete_with(payload))
            }
            RequestSubStage::Completed | RequestSubStage::Error | RequestSubStage::Cancelled => {
                Ok(Step::Await)
            }
        }
    }
}
