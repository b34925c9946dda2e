//! Reservation - resource pool を選び、placement で host を決める

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::placement::{Placement, PlacementPayload};
use crate::domain::{HandlerError, HostSelection};
use crate::ports::ProvisioningAdapter;
use crate::typed::{Handler, Step, SubStage, Task, TaskContext, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationSubStage {
    Created,
    Selected,
    Placement,
    HostsSelected,
    Completed,
    Error,
    Cancelled,
}

impl SubStage for ReservationSubStage {
    const ALL: &'static [Self] = &[
        Self::Created,
        Self::Selected,
        Self::Placement,
        Self::HostsSelected,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];
    const INITIAL: Self = Self::Created;
    const COMPLETED: Self = Self::Completed;
    const ERROR: Self = Self::Error;
    const CANCELLED: Self = Self::Cancelled;

    fn is_transient(self) -> bool {
        matches!(self, Self::Placement)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationPayload {
    #[serde(default)]
    pub resource_description_link: String,

    #[serde(default)]
    pub resource_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_resource_placement_link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool_links: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_selections: Option<Vec<HostSelection>>,
}

pub struct Reservation;

impl Task for Reservation {
    const TYPE: &'static str = "reservation";
    const FACTORY_LINK: &'static str = "/request/reservation-tasks";
    type SubStage = ReservationSubStage;
    type Payload = ReservationPayload;
}

pub struct ReservationHandler {
    adapter: Arc<dyn ProvisioningAdapter>,
}

impl ReservationHandler {
    pub fn new(adapter: Arc<dyn ProvisioningAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Handler<Reservation> for ReservationHandler {
    async fn handle(
        &self,
        ctx: &TaskContext<Reservation>,
        state: &TaskState<Reservation>,
    ) -> Result<Step<Reservation>, HandlerError> {
        let mut payload = state.payload.clone();
        match state.sub_stage {
            ReservationSubStage::Created => {
                let selection = self
                    .adapter
                    .select_resource_pool(&state.tenant_links, payload.resource_count)
                    .await?;
                payload.group_resource_placement_link =
                    Some(selection.group_resource_placement_link);
                payload.resource_pool_links = Some(selection.resource_pool_links);
                Ok(Step::proceed_with(ReservationSubStage::Selected, payload))
            }
            ReservationSubStage::Selected => Ok(Step::proceed(ReservationSubStage::Placement)),
            ReservationSubStage::Placement => {
                let placement = PlacementPayload {
                    resource_pool_links: payload.resource_pool_links.unwrap_or_default(),
                    resource_count: payload.resource_count,
                    host_selections: None,
                };
                ctx.spawn_child::<Placement>(
                    placement,
                    ReservationSubStage::HostsSelected,
                    ReservationSubStage::Error,
                )
                .await?;
                Ok(Step::Await)
            }
            ReservationSubStage::HostsSelected => {
                let placement = ctx.load_source::<Placement>().await?;
                payload.host_selections = placement.payload.host_selections;
                Ok(Step::complete_with(payload))
            }
            ReservationSubStage::Completed
            | ReservationSubStage::Error
            | ReservationSubStage::Cancelled => Ok(Step::Await),
        }
    }
}
