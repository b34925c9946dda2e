//! Impls - 開発・テスト用の実装
//!
//! - InMemoryDocumentStore: DocumentStore のインメモリ実装
//! - InMemoryAdapter: ProvisioningAdapter のインメモリ実装（失敗注入つき）

pub mod inmem_adapter;
pub mod inmem_store;

pub use self::inmem_adapter::{AdapterOperation, InMemoryAdapter};
pub use self::inmem_store::InMemoryDocumentStore;
