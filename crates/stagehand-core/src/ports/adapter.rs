//! ProvisioningAdapter port - Docker / Kubernetes / cloud への窓口
//!
//! core からは「完了するか失敗するか」だけの非同期操作に見える。

use async_trait::async_trait;

use crate::domain::{AdapterError, HostSelection, PoolSelection};

#[async_trait]
pub trait ProvisioningAdapter: Send + Sync {
    /// Pick a resource pool able to hold `resource_count` resources.
    async fn select_resource_pool(
        &self,
        tenant_links: &[String],
        resource_count: u32,
    ) -> Result<PoolSelection, AdapterError>;

    /// Pick `resource_count` hosts from the given pools.
    async fn select_hosts(
        &self,
        resource_pool_links: &[String],
        resource_count: u32,
    ) -> Result<Vec<HostSelection>, AdapterError>;

    /// Returns the link of the provisioned container.
    async fn provision_container(
        &self,
        name: &str,
        host: &HostSelection,
    ) -> Result<String, AdapterError>;

    /// Returns the link of the provisioned network.
    async fn provision_network(&self, name: &str, subnet_cidr: &str)
    -> Result<String, AdapterError>;
}
