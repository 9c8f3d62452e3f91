//! relay-core
//!
//! Request/response correlation broker. A caller submits a job, the broker
//! dispatches it to a worker and, for asynchronous (voice) jobs, suspends the
//! caller until the worker posts the result back to the callback endpoint.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（CorrelationId, JobRequest, CallbackPayload, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, WorkerClient）
//! - **registry**: Pending-Request Registry（waiter の登録・完了・timeout・supersede）
//! - **origin**: callback の送信元検証
//! - **app**: Broker と AppBuilder（submission / callback の 2 経路）
//! - **impls**: 実装（reqwest による HTTP worker client）
//! - **http**: axum router とサーバ起動
//! - **config** / **observability**: 環境変数設定とログ初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod impls;
pub mod observability;
pub mod origin;
pub mod ports;
pub mod registry;
