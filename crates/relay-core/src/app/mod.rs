//! App - アプリケーション層
//!
//! registry / origin validator / worker port を組み合わせて
//! submission と callback の 2 経路を実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: 設定から Broker を組み立てる（fail-fast）
//! - **Broker**: submission path と callback path
//! - **RegistryStatus**: 待機中リクエストの診断

pub mod broker;
pub mod builder;
pub mod status;

pub use self::broker::{Broker, CallbackReceipt, JobResponse, MatchedBy};
pub use self::builder::{AppBuilder, BuildError};
pub use self::status::{PendingRequestStatus, RegistryStatus};
