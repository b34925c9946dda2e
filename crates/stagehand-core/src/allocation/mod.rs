//! Allocation - pool ごとの共有 state を optimistic concurrency で更新する
//!
//! - `cidr`: IPv4 CIDR と次の空き block を決める純粋関数
//! - `state`: allocation document の payload と request
//! - `service`: create / allocate / deallocate / reconfigure（CAS + ConflictRetry）

pub mod cidr;
pub mod service;
pub mod state;

pub use self::cidr::{Ipv4Cidr, next_free_block};
pub use self::service::AllocationService;
pub use self::state::{AllocationRequest, AllocationRequestType, AllocationState, PoolSpec};
