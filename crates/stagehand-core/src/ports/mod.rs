//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システム
//! （replicated document store, provisioning adapter など）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod adapter;
pub mod clock;
pub mod document_store;
pub mod id_generator;

pub use self::adapter::ProvisioningAdapter;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::document_store::{DocumentStore, SnapshotQuery};
pub use self::id_generator::{IdGenerator, UlidGenerator};
