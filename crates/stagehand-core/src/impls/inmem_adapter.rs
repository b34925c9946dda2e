//! In-memory provisioning adapter (開発・テスト用)
//!
//! - 設定したプールとホストからそのまま選ぶ
//! - `fail_on` で任意の操作を失敗させられる

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::domain::{AdapterError, HostSelection, PoolSelection};
use crate::ports::ProvisioningAdapter;

/// 失敗を注入できる操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterOperation {
    SelectResourcePool,
    SelectHosts,
    ProvisionContainer,
    ProvisionNetwork,
}

#[derive(Debug, Clone)]
struct PoolConfig {
    group_link: String,
    pool_link: String,
    hosts: Vec<String>,
}

pub struct InMemoryAdapter {
    pools: Vec<PoolConfig>,
    failing: Mutex<HashSet<AdapterOperation>>,
    next_resource: AtomicU64,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self {
            pools: Vec::new(),
            failing: Mutex::new(HashSet::new()),
            next_resource: AtomicU64::new(1),
        }
    }

    /// Adapter with one pool of `host_count` hosts.
    pub fn single_pool(host_count: usize) -> Self {
        let hosts = (1..=host_count)
            .map(|i| format!("/resources/compute/host-{i}"))
            .collect();
        Self::new().with_pool(
            "/resources/group-placements/default",
            "/resources/pools/default",
            hosts,
        )
    }

    pub fn with_pool(
        mut self,
        group_link: impl Into<String>,
        pool_link: impl Into<String>,
        hosts: Vec<String>,
    ) -> Self {
        self.pools.push(PoolConfig {
            group_link: group_link.into(),
            pool_link: pool_link.into(),
            hosts,
        });
        self
    }

    pub fn fail_on(&self, operation: AdapterOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn recover(&self, operation: AdapterOperation) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&operation);
        }
    }

    fn check(&self, operation: AdapterOperation) -> Result<(), AdapterError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&operation))
            .unwrap_or(false);
        if failing {
            return Err(AdapterError::Failed(format!("{operation:?} is failing")));
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_resource.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for InMemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisioningAdapter for InMemoryAdapter {
    async fn select_resource_pool(
        &self,
        _tenant_links: &[String],
        resource_count: u32,
    ) -> Result<PoolSelection, AdapterError> {
        self.check(AdapterOperation::SelectResourcePool)?;
        let pool = self
            .pools
            .iter()
            .find(|p| p.hosts.len() >= resource_count as usize)
            .ok_or_else(|| {
                AdapterError::NoCapacity(format!("no pool can hold {resource_count} resources"))
            })?;
        Ok(PoolSelection {
            group_resource_placement_link: pool.group_link.clone(),
            resource_pool_links: vec![pool.pool_link.clone()],
        })
    }

    async fn select_hosts(
        &self,
        resource_pool_links: &[String],
        resource_count: u32,
    ) -> Result<Vec<HostSelection>, AdapterError> {
        self.check(AdapterOperation::SelectHosts)?;
        let selections: Vec<HostSelection> = self
            .pools
            .iter()
            .filter(|p| resource_pool_links.contains(&p.pool_link))
            .flat_map(|p| {
                p.hosts.iter().map(|h| HostSelection {
                    host_link: h.clone(),
                    resource_pool_link: p.pool_link.clone(),
                })
            })
            .take(resource_count as usize)
            .collect();
        if selections.len() < resource_count as usize {
            return Err(AdapterError::NoCapacity(format!(
                "{} of {resource_count} hosts available",
                selections.len()
            )));
        }
        Ok(selections)
    }

    async fn provision_container(
        &self,
        name: &str,
        host: &HostSelection,
    ) -> Result<String, AdapterError> {
        self.check(AdapterOperation::ProvisionContainer)?;
        tracing::debug!(name, host = %host.host_link, "provisioned container");
        Ok(format!("/resources/containers/{name}-{}", self.next_id()))
    }

    async fn provision_network(
        &self,
        name: &str,
        subnet_cidr: &str,
    ) -> Result<String, AdapterError> {
        self.check(AdapterOperation::ProvisionNetwork)?;
        tracing::debug!(name, subnet_cidr, "provisioned network");
        Ok(format!("/resources/networks/{name}-{}", self.next_id()))
    }
}
