//! Ports - 抽象化レイヤー
//!
//! 外部（時刻、ID 生成、downstream worker）へのインターフェースを trait で定義し、
//! テストでは差し替えられるようにしています。

pub mod clock;
pub mod id_generator;
pub mod worker;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::worker::{UpstreamError, WorkerClient};
