//! IdGenerator port - correlation id 生成の抽象化
//!
//! テスト容易性のために trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::CorrelationId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は in-flight job ごとに一意な correlation id を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の request handler から呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> CorrelationId;
}

/// UlidGenerator は Clock の時刻 + 80bit の乱数で ULID を作る
///
/// FixedClock を渡すと timestamp 部分だけが固定されます。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate(&self) -> CorrelationId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        CorrelationId::from_ulid(ulid)
    }
}
