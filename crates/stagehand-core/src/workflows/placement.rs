use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{HandlerError, HostSelection};
use crate::ports::ProvisioningAdapter;
use crate::typed::{Handler, Step, SubStage, Task, TaskContext, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementSubStage {
    Created,
    Completed,
    Error,
    Cancelled,
}

impl SubStage for PlacementSubStage {
    const ALL: &'static [Self] = &[Self::Created, Self::Completed, Self::Error, Self::Cancelled];
    const INITIAL: Self = Self::Created;
    const COMPLETED: Self = Self::Completed;
    const ERROR: Self = Self::Error;
    const CANCELLED: Self = Self::Cancelled;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementPayload {
    #[serde(default)]
    pub resource_pool_links: Vec<String>,

    #[serde(default)]
    pub resource_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_selections: Option<Vec<HostSelection>>,
}

/// Host selection for one reservation.
pub struct Placement;

impl Task for Placement {
    const TYPE: &'static str = "placement";
    const FACTORY_LINK: &'static str = "/request/placement-tasks";
    type SubStage = PlacementSubStage;
    type Payload = PlacementPayload;
}

pub struct PlacementHandler {
    adapter: Arc<dyn ProvisioningAdapter>,
}

impl PlacementHandler {
    pub fn new(adapter: Arc<dyn ProvisioningAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Handler<Placement> for PlacementHandler {
    async fn handle(
        &self,
        _ctx: &TaskContext<Placement>,
        state: &TaskState<Placement>,
    ) -> Result<Step<Placement>, HandlerError> {
        if state.sub_stage != PlacementSubStage::Created {
            return Ok(Step::Await);
        }
        let hosts = self
            .adapter
            .select_hosts(&state.payload.resource_pool_links, state.payload.resource_count)
            .await?;
        let mut payload = state.payload.clone();
        payload.host_selections = Some(hosts);
        Ok(Step::complete_with(payload))
    }
}
