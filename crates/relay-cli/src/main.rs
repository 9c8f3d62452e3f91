//! relay: HTTP broker between callers and an asynchronous worker.
//!
//! 設定はすべて環境変数（`RELAY_*`）から読む。`RELAY_WORKER_URL` だけ必須。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use relay_core::app::AppBuilder;
use relay_core::config::Config;
use relay_core::http;
use relay_core::observability::{LogFormat, init_logging};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    init_logging(LogFormat::for_debug(config.debug));

    let broker = AppBuilder::from_config(&config)
        .build()
        .context("configuring broker")?;
    let router = http::router(Arc::new(broker), &config.cors);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    http::serve(listener, router, shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("relay stopped");
    Ok(())
}

/// Ctrl-C で graceful shutdown。待機中の呼び出しは接続ごと閉じられる。
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
