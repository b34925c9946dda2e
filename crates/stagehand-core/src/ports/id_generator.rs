//! IdGenerator port - DocumentLink 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::DocumentLink;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は factory 配下の一意な DocumentLink を生成
///
/// # ULID の特性
/// - 時刻でソート可能
/// - 分散環境で生成可能（調整不要）
pub trait IdGenerator: Send + Sync {
    fn generate_link(&self, factory_link: &str) -> DocumentLink;
}

/// UlidGenerator は Clock の時刻 + 乱数で ULID を作る
///
/// FixedClock を使うと timestamp 部分が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_link(&self, factory_link: &str) -> DocumentLink {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        DocumentLink::under(factory_link, ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn links_are_unique_under_factory() {
        let id_gen = UlidGenerator::new(SystemClock);

        let a = id_gen.generate_link("/requests");
        let b = id_gen.generate_link("/requests");

        assert_ne!(a, b);
        assert_eq!(a.factory(), "/requests");
    }

    #[test]
    fn fixed_clock_pins_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let link = id_gen.generate_link("/requests");
        let ulid = Ulid::from_string(&link.id().to_uppercase()).unwrap();
        assert_eq!(ulid.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
