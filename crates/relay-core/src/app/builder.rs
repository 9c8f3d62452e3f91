//! AppBuilder - Broker の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - worker URL が無い / URL に hostname が無いなら `build()` でエラー
//! - 起動後に「callback が全部 403 になる」ような設定ミスを避ける

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;

use super::broker::Broker;
use crate::config::{
    Config, DEFAULT_CALLBACK_PATH, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_PUBLIC_URL, DEFAULT_STT_URL,
};
use crate::impls::HttpWorkerClient;
use crate::impls::http_worker::DEFAULT_REQUEST_TIMEOUT;
use crate::origin::{DEFAULT_TUNNEL_PATTERNS, OriginValidator};
use crate::ports::WorkerClient;
use crate::registry::{PendingRegistry, RegistryMode};

/// callback path に使えないパス（他のルートと衝突する）
const RESERVED_PATHS: &[&str] = &["/", "/api/execute", "/health", "/status"];

/// BuildError は Broker 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("worker URL is required")]
    MissingWorkerUrl,

    #[error("{name} is not a usable URL ({value}): {reason}")]
    InvalidUrl {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("callback path must start with '/' and not shadow another route (got {0})")]
    InvalidCallbackPath(String),
}

/// # 使用例
/// ```ignore
/// let broker = AppBuilder::from_config(&config).build()?;
/// ```
pub struct AppBuilder {
    worker_url: Option<String>,
    stt_url: String,
    public_url: String,
    callback_path: String,
    callback_timeout: Duration,
    worker_timeout: Duration,
    registry_mode: RegistryMode,
    tunnel_patterns: Vec<String>,
    worker: Option<Arc<dyn WorkerClient>>,
    registry: Option<PendingRegistry>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            worker_url: None,
            stt_url: DEFAULT_STT_URL.to_string(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            worker_timeout: DEFAULT_REQUEST_TIMEOUT,
            registry_mode: RegistryMode::default(),
            tunnel_patterns: DEFAULT_TUNNEL_PATTERNS.iter().map(|p| p.to_string()).collect(),
            worker: None,
            registry: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .worker_url(config.worker_url.clone())
            .stt_url(config.stt_url.clone())
            .public_url(config.public_url.clone())
            .callback_path(config.callback_path.clone())
            .callback_timeout(config.callback_timeout)
            .worker_timeout(config.worker_timeout)
            .registry_mode(config.registry_mode)
            .tunnel_patterns(config.tunnel_patterns.clone())
    }

    pub fn worker_url(mut self, url: impl Into<String>) -> Self {
        self.worker_url = Some(url.into());
        self
    }

    pub fn stt_url(mut self, url: impl Into<String>) -> Self {
        self.stt_url = url.into();
        self
    }

    pub fn public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = url.into();
        self
    }

    pub fn callback_path(mut self, path: impl Into<String>) -> Self {
        self.callback_path = path.into();
        self
    }

    pub fn callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    pub fn registry_mode(mut self, mode: RegistryMode) -> Self {
        self.registry_mode = mode;
        self
    }

    pub fn tunnel_patterns(mut self, patterns: Vec<String>) -> Self {
        self.tunnel_patterns = patterns;
        self
    }

    /// Replace the HTTP worker client (tests, alternative transports).
    pub fn worker_client(mut self, worker: Arc<dyn WorkerClient>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Share an existing registry instead of creating one.
    pub fn registry(mut self, registry: PendingRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Broker, BuildError> {
        let worker_url = self
            .worker_url
            .filter(|u| !u.trim().is_empty())
            .ok_or(BuildError::MissingWorkerUrl)?;
        require_host("worker URL", &worker_url)?;
        require_host("public URL", &self.public_url)?;

        if !self.callback_path.starts_with('/')
            || RESERVED_PATHS.contains(&self.callback_path.as_str())
        {
            return Err(BuildError::InvalidCallbackPath(self.callback_path));
        }
        let callback_raw = format!(
            "{}{}",
            self.public_url.trim_end_matches('/'),
            self.callback_path
        );
        let callback_url = Url::parse(&callback_raw).map_err(|e| BuildError::InvalidUrl {
            name: "callback URL",
            value: callback_raw.clone(),
            reason: e.to_string(),
        })?;

        let worker = match self.worker {
            Some(worker) => worker,
            None => {
                require_host("STT URL", &self.stt_url)?;
                Arc::new(HttpWorkerClient::with_timeout(
                    worker_url.clone(),
                    self.stt_url.clone(),
                    self.worker_timeout,
                ))
            }
        };

        let validator =
            OriginValidator::new(&worker_url, &self.public_url, &self.tunnel_patterns);
        let registry = self
            .registry
            .unwrap_or_else(|| PendingRegistry::new(self.registry_mode));

        tracing::info!(
            worker_url = %worker_url,
            callback_url = %callback_url,
            registry_mode = ?registry.mode(),
            allowed_hosts = ?validator.allowed_hosts(),
            "broker configured"
        );

        Ok(Broker {
            registry,
            worker,
            validator,
            callback_url,
            callback_timeout: self.callback_timeout,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn require_host(name: &'static str, raw: &str) -> Result<(), BuildError> {
    let invalid = |reason: String| BuildError::InvalidUrl {
        name,
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing hostname".to_string()));
    }
    Ok(())
}
