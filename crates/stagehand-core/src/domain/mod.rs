//! Domain model (ids, stages, documents, snapshots, errors).

pub mod document;
pub mod errors;
pub mod ids;
pub mod resource;
pub mod snapshot;
pub mod stage;

pub use self::document::{FailureCause, StagePatch, TaskCallback, TaskDocument};
pub use self::errors::{
    AdapterError, AllocationError, ErrorKind, HandlerError, StoreError, TaskError,
};
pub use self::ids::{DocumentLink, SnapshotKey, TaskType};
pub use self::resource::{HostSelection, PoolSelection, ResourceType};
pub use self::snapshot::{StageSnapshot, TransitionSource};
pub use self::stage::TaskStage;
