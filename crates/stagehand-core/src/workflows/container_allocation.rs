//! Container allocation - 名前を決めて、選ばれた host に container を作る

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::resource_name;
use crate::domain::{HandlerError, HostSelection};
use crate::ports::ProvisioningAdapter;
use crate::typed::{Handler, Step, SubStage, Task, TaskContext, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerAllocationSubStage {
    Created,
    ResourcesNamed,
    Provisioning,
    Completed,
    Error,
    Cancelled,
}

impl SubStage for ContainerAllocationSubStage {
    const ALL: &'static [Self] = &[
        Self::Created,
        Self::ResourcesNamed,
        Self::Provisioning,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];
    const INITIAL: Self = Self::Created;
    const COMPLETED: Self = Self::Completed;
    const ERROR: Self = Self::Error;
    const CANCELLED: Self = Self::Cancelled;

    fn is_transient(self) -> bool {
        matches!(self, Self::Provisioning)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerAllocationPayload {
    #[serde(default)]
    pub resource_description_link: String,

    #[serde(default)]
    pub resource_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_resource_placement_link: Option<String>,

    #[serde(default)]
    pub host_selections: Vec<HostSelection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_names: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_links: Option<Vec<String>>,
}

pub struct ContainerAllocation;

impl Task for ContainerAllocation {
    const TYPE: &'static str = "container-allocation";
    const FACTORY_LINK: &'static str = "/request/container-allocation-tasks";
    type SubStage = ContainerAllocationSubStage;
    type Payload = ContainerAllocationPayload;
}

pub struct ContainerAllocationHandler {
    adapter: Arc<dyn ProvisioningAdapter>,
}

impl ContainerAllocationHandler {
    pub fn new(adapter: Arc<dyn ProvisioningAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Handler<ContainerAllocation> for ContainerAllocationHandler {
    async fn handle(
        &self,
        _ctx: &TaskContext<ContainerAllocation>,
        state: &TaskState<ContainerAllocation>,
    ) -> Result<Step<ContainerAllocation>, HandlerError> {
        let mut payload = state.payload.clone();
        match state.sub_stage {
            ContainerAllocationSubStage::Created => {
                let base = resource_name(&payload.resource_description_link);
                payload.resource_names = Some(
                    (1..=payload.resource_count)
                        .map(|i| format!("{base}-mcm{i}"))
                        .collect(),
                );
                Ok(Step::proceed_with(
                    ContainerAllocationSubStage::ResourcesNamed,
                    payload,
                ))
            }
            ContainerAllocationSubStage::ResourcesNamed => {
                Ok(Step::proceed(ContainerAllocationSubStage::Provisioning))
            }
            ContainerAllocationSubStage::Provisioning => {
                if payload.host_selections.is_empty() {
                    return Err(HandlerError::new("no hosts selected for allocation"));
                }
                let names = payload.resource_names.clone().unwrap_or_default();
                let mut links = Vec::with_capacity(names.len());
                // round-robin over the selected hosts
                for (name, host) in names.iter().zip(payload.host_selections.iter().cycle()) {
                    links.push(self.adapter.provision_container(name, host).await?);
                }
                payload.resource_links = Some(links);
                Ok(Step::complete_with(payload))
            }
            ContainerAllocationSubStage::Completed
            | ContainerAllocationSubStage::Error
            | ContainerAllocationSubStage::Cancelled => Ok(Step::Await),
        }
    }
}
