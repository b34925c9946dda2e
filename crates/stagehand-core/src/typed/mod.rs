//! Typed - 型付き Task API
//!
//! task_type や sub-stage の typo を型で排除し、
//! Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` / `SubStage` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure

pub mod handler;
pub mod merge;
pub mod registry;
pub mod task;

pub use self::handler::{DynHandler, DynStep, Handler, Step, TaskContext, TaskState};
pub use self::registry::{RegistryError, SubStageGraph, TaskEntry, TaskRegistry};
pub use self::task::{MergePolicy, SubStage, Task};
