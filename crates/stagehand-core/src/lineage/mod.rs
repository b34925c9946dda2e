//! Lineage - transition source を後ろ向きに辿って request の因果履歴を復元する
//!
//! # 主要コンポーネント
//! - **LineageGraph**: snapshot key → snapshot の index と `walk`
//! - **LineageVisitor**: resource type ごとの解釈（container / network）
//! - **LineageService**: store からのクエリ（`query`, `query_all`, `request_graph`）
//!
//! walk は purge 済みの snapshot に当たると止まり、結果は部分的なまま返る。

pub mod container;
pub mod graph;
pub mod network;
pub mod service;
pub mod visitor;

pub use self::container::ContainerRequestVisitor;
pub use self::graph::{LineageGraph, Walk};
pub use self::network::NetworkRequestVisitor;
pub use self::service::{LineageService, RequestGraph, TaskHistory};
pub use self::visitor::{
    ComponentInfo, ContainerInfo, Hop, LineageVisitor, NetworkInfo, VisitorRegistry, fold_walk,
};
