//! Resource value types shared by workflows and lineage visitors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of resource a request provisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    #[default]
    Container,
    Network,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceType::Container => "CONTAINER",
            ResourceType::Network => "NETWORK",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONTAINER" => Ok(ResourceType::Container),
            "NETWORK" => Ok(ResourceType::Network),
            other => Err(format!("unknown resource type '{other}'")),
        }
    }
}

/// A host chosen by placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSelection {
    pub host_link: String,
    pub resource_pool_link: String,
}

/// A resource pool chosen for a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSelection {
    pub group_resource_placement_link: String,
    pub resource_pool_links: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_type_parses_case_insensitively() {
        assert_eq!("network".parse::<ResourceType>(), Ok(ResourceType::Network));
        assert_eq!("CONTAINER".parse::<ResourceType>(), Ok(ResourceType::Container));
        assert!("volume".parse::<ResourceType>().is_err());
    }
}
