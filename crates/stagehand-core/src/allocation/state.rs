use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Payload of the per-pool allocation document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationState {
    pub pool_link: String,

    /// Network the subnets are carved from, e.g. `10.0.0.0/16`.
    pub network_cidr: String,

    /// Prefix length of every handed-out subnet.
    pub prefix_length: u8,

    /// consumer key -> subnet CIDR
    #[serde(default)]
    pub assigned: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assigned_value: Option<String>,
}

impl AllocationState {
    pub fn assigned_to(&self, consumer_key: &str) -> Option<&str> {
        self.assigned.get(consumer_key).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationRequestType {
    Allocate,
    Deallocate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationRequest {
    pub request_type: AllocationRequestType,
    pub consumer_key: String,
}

impl AllocationRequest {
    pub fn allocate(consumer_key: impl Into<String>) -> Self {
        Self {
            request_type: AllocationRequestType::Allocate,
            consumer_key: consumer_key.into(),
        }
    }

    pub fn deallocate(consumer_key: impl Into<String>) -> Self {
        Self {
            request_type: AllocationRequestType::Deallocate,
            consumer_key: consumer_key.into(),
        }
    }
}

/// Pool definition for `AllocationService::create_pool`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    pub pool_link: String,
    pub network_cidr: String,
    pub prefix_length: u8,
}
