//! Task / SubStage trait - 型付き task type の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`, `const ALL`)
//! - Associated Types (`type SubStage`, `type Payload`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use std::fmt::Debug;
use std::hash::Hash;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// SubStage は task type ごとの細かい状態
///
/// # 使用例
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
/// enum MySubStage { Created, Working, Completed, Error, Cancelled }
///
/// impl SubStage for MySubStage {
///     const ALL: &'static [Self] = &[Self::Created, Self::Working, Self::Completed, Self::Error, Self::Cancelled];
///     const INITIAL: Self = Self::Created;
///     const COMPLETED: Self = Self::Completed;
///     const ERROR: Self = Self::Error;
///     const CANCELLED: Self = Self::Cancelled;
/// }
/// ```
///
/// # 順序
/// - `ALL` の並びが遷移の順序。後ろ向きの遷移は拒否される
/// - `is_transient` が true の sub-stage は patch の到着順が保証されないので、
///   後ろ向きでも拒否ではなく無視される
pub trait SubStage:
    Copy + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ALL: &'static [Self];
    const INITIAL: Self;
    const COMPLETED: Self;
    const ERROR: Self;
    const CANCELLED: Self;

    fn is_transient(self) -> bool {
        false
    }

    /// serde 上の名前（`"RESERVED"` など）
    fn name(self) -> String {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{self:?}"))
    }

    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }
}

/// Payload field ごとのマージ方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// patch の値で上書き
    #[default]
    Overwrite,

    /// 未設定（absent / null）のときだけ書き込む
    OnlyIfAbsent,
}

/// Task は task_type と sub-stage / payload 型を対応付ける
///
/// # 使用例
/// ```ignore
/// pub struct Placement;
///
/// impl Task for Placement {
///     const TYPE: &'static str = "placement";
///     const FACTORY_LINK: &'static str = "/request/placement-tasks";
///     type SubStage = PlacementSubStage;
///     type Payload = PlacementPayload;
/// }
/// ```
///
/// # Payload
/// - JSON object として保存される
/// - patch 時は null のフィールドがスキップされるので、
///   `Option` フィールドには `skip_serializing_if = "Option::is_none"` を付ける
pub trait Task: Send + Sync + 'static {
    /// task_type（snapshot に記録される判別子）
    const TYPE: &'static str;

    /// document link の prefix
    const FACTORY_LINK: &'static str;

    type SubStage: SubStage;
    type Payload: Serialize + DeserializeOwned + Default + Clone + Send + Sync + 'static;

    fn merge_policy(_field: &str) -> MergePolicy {
        MergePolicy::Overwrite
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::StepSubStage;
    use super::*;

    #[test]
    fn names_follow_serde() {
        assert_eq!(StepSubStage::Finalizing.name(), "FINALIZING");
        assert_eq!(StepSubStage::parse("WAITING"), Some(StepSubStage::Waiting));
        assert_eq!(StepSubStage::parse("waiting"), None);
    }

    #[test]
    fn only_declared_sub_stages_are_transient() {
        let transient: Vec<_> = StepSubStage::ALL
            .iter()
            .filter(|s| s.is_transient())
            .collect();
        assert_eq!(transient, vec![&StepSubStage::Waiting]);
    }
}
