//! IPv4 CIDR blocks and the next-free-subnet function.

use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::domain::AllocationError;

/// An IPv4 network in CIDR notation; the address is always masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, AllocationError> {
        if prefix > 32 {
            return Err(AllocationError::InvalidCidr(format!("{addr}/{prefix}")));
        }
        let masked = u32::from(addr) & Self::mask(prefix);
        Ok(Self {
            addr: Ipv4Addr::from(masked),
            prefix,
        })
    }

    fn mask(prefix: u8) -> u32 {
        match prefix {
            0 => 0,
            p => u32::MAX << (32 - u32::from(p)),
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Number of `/sub_prefix` blocks this network splits into.
    pub fn block_count(&self, sub_prefix: u8) -> u64 {
        if sub_prefix < self.prefix || sub_prefix > 32 {
            return 0;
        }
        1u64 << (sub_prefix - self.prefix)
    }

    /// The `index`-th `/sub_prefix` block of the sequential partition.
    pub fn nth_subnet(&self, sub_prefix: u8, index: u64) -> Option<Ipv4Cidr> {
        if index >= self.block_count(sub_prefix) {
            return None;
        }
        let size = 1u64 << (32 - u32::from(sub_prefix));
        let start = u64::from(u32::from(self.addr)) + index * size;
        let start = u32::try_from(start).ok()?;
        Some(Ipv4Cidr {
            addr: Ipv4Addr::from(start),
            prefix: sub_prefix,
        })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = AllocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AllocationError::InvalidCidr(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix).map_err(|_| invalid())
    }
}

/// Smallest-index `/sub_prefix` block of `network` not in `assigned`.
///
/// Deterministic and stateless: depends only on the current assigned set.
pub fn next_free_block<'a>(
    network: &Ipv4Cidr,
    sub_prefix: u8,
    assigned: impl IntoIterator<Item = &'a String>,
) -> Option<Ipv4Cidr> {
    let taken: HashSet<&str> = assigned.into_iter().map(String::as_str).collect();
    (0..network.block_count(sub_prefix))
        .filter_map(|i| network.nth_subnet(sub_prefix, i))
        .find(|block| !taken.contains(block.to_string().as_str()))
}
