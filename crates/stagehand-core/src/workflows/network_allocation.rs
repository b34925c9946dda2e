//! Network allocation - allocation pool から subnet を取り、network を作る
//!
//! provisioning に失敗したら subnet を返してから失敗する。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::resource_name;
use crate::allocation::AllocationService;
use crate::domain::{DocumentLink, HandlerError};
use crate::ports::ProvisioningAdapter;
use crate::typed::{Handler, Step, SubStage, Task, TaskContext, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkAllocationSubStage {
    Created,
    CidrAllocated,
    Completed,
    Error,
    Cancelled,
}

impl SubStage for NetworkAllocationSubStage {
    const ALL: &'static [Self] = &[
        Self::Created,
        Self::CidrAllocated,
        Self::Completed,
        Self::Error,
        Self::Cancelled,
    ];
    const INITIAL: Self = Self::Created;
    const COMPLETED: Self = Self::Completed;
    const ERROR: Self = Self::Error;
    const CANCELLED: Self = Self::Cancelled;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkAllocationPayload {
    #[serde(default)]
    pub cidr_allocation_link: String,

    #[serde(default)]
    pub resource_description_link: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_cidr: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_links: Option<Vec<String>>,
}

pub struct NetworkAllocation;

impl Task for NetworkAllocation {
    const TYPE: &'static str = "network-allocation";
    const FACTORY_LINK: &'static str = "/request/network-allocation-tasks";
    type SubStage = NetworkAllocationSubStage;
    type Payload = NetworkAllocationPayload;
}

pub struct NetworkAllocationHandler {
    adapter: Arc<dyn ProvisioningAdapter>,
    allocations: Arc<AllocationService>,
}

impl NetworkAllocationHandler {
    pub fn new(adapter: Arc<dyn ProvisioningAdapter>, allocations: Arc<AllocationService>) -> Self {
        Self {
            adapter,
            allocations,
        }
    }
}

#[async_trait]
impl Handler<NetworkAllocation> for NetworkAllocationHandler {
    async fn handle(
        &self,
        ctx: &TaskContext<NetworkAllocation>,
        state: &TaskState<NetworkAllocation>,
    ) -> Result<Step<NetworkAllocation>, HandlerError> {
        let mut payload = state.payload.clone();
        let pool = DocumentLink::new(payload.cidr_allocation_link.clone());
        // one subnet per allocation task
        let consumer_key = ctx.link().as_str();

        match state.sub_stage {
            NetworkAllocationSubStage::Created => {
                let subnet = self.allocations.allocate(&pool, consumer_key).await?;
                payload.subnet_cidr = Some(subnet);
                Ok(Step::proceed_with(
                    NetworkAllocationSubStage::CidrAllocated,
                    payload,
                ))
            }
            NetworkAllocationSubStage::CidrAllocated => {
                let subnet = payload
                    .subnet_cidr
                    .clone()
                    .ok_or_else(|| HandlerError::new("no subnet allocated"))?;
                let name = resource_name(&payload.resource_description_link);
                match self.adapter.provision_network(&name, &subnet).await {
                    Ok(link) => {
                        payload.resource_links = Some(vec![link]);
                        Ok(Step::complete_with(payload))
                    }
                    Err(e) => {
                        if let Err(release) = self.allocations.deallocate(&pool, consumer_key).await {
                            warn!(%pool, consumer_key, error = %release, "Failed to release subnet");
                        }
                        Err(e.into())
                    }
                }
            }
            NetworkAllocationSubStage::Completed
            | NetworkAllocationSubStage::Error
            | NetworkAllocationSubStage::Cancelled => Ok(Step::Await),
        }
    }
}
