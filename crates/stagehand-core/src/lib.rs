//! stagehand-core
//!
//! Core building blocks for the Stagehand control plane.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, stage, document, snapshot, resource, errors）
//! - **ports**: 抽象化レイヤー（DocumentStore, Clock, IdGenerator, ProvisioningAdapter）
//! - **impls**: 実装（InMemoryDocumentStore, InMemoryAdapter など開発用）
//! - **typed**: 型付き Task API（Task / SubStage trait, Handler trait, TaskRegistry）
//! - **app**: アプリケーションロジック（builder, runtime, transition, sweeper）
//! - **lineage**: snapshot の transition source を辿る lineage 復元と visitor
//! - **allocation**: optimistic concurrency による subnet 割り当て
//! - **workflows**: request / reservation / placement / allocation の参照 workflow
//! - **config**: TOML 設定

pub mod domain;
pub mod ports;
pub mod app;
pub mod typed;
pub mod impls;
pub mod lineage;
pub mod allocation;
pub mod workflows;
pub mod config;
