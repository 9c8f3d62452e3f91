//! Impls - ports の実装
//!
//! - **HttpWorkerClient**: reqwest で worker / STT server を呼ぶ

pub mod http_worker;

pub use self::http_worker::HttpWorkerClient;
