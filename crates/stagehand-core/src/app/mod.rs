//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせて task runtime を実装します。
//!
//! # 主要コンポーネント
//! - **ControlPlaneBuilder**: 構築とワイヤリング
//! - **TaskRuntime**: start / patch / callback / resume / purge
//! - **transition**: sub-stage 遷移の検証
//! - **ConflictRetry**: version conflict の再試行方針
//! - **ExpirationSweeper**: 期限切れ task の定期 purge

pub mod builder;
pub mod retry;
pub mod runtime;
pub mod sweeper;
pub mod transition;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, ControlPlane, ControlPlaneBuilder};
pub use self::retry::ConflictRetry;
pub use self::runtime::{StartDirective, StartRequest, TaskRuntime};
pub use self::sweeper::ExpirationSweeper;
pub use self::transition::{TransitionOutcome, Verdict};
