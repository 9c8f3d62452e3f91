//! Configuration loaded from environment variables.
//!
//! Values are trimmed; an empty variable counts as unset.

use std::time::Duration;

use thiserror::Error;

use crate::registry::RegistryMode;

pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_STT_URL: &str = "http://localhost:8003";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:3000";
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CORS_MAX_AGE_SECONDS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {0} is not set")]
    Missing(&'static str),

    #[error("{name} {message}")]
    Invalid { name: &'static str, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// CORS policy for every route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// `["*"]` means any origin.
    pub allowed_origins: Vec<String>,
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
            max_age_seconds: DEFAULT_CORS_MAX_AGE_SECONDS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    /// Trusted worker base URL (`RELAY_WORKER_URL`, required).
    pub worker_url: String,
    pub stt_url: String,
    /// Own public base URL used to build callback URLs.
    pub public_url: String,
    pub callback_path: String,
    pub callback_timeout: Duration,
    pub worker_timeout: Duration,
    pub registry_mode: RegistryMode,
    pub tunnel_patterns: Vec<String>,
    pub cors: CorsConfig,
    /// Pretty logs instead of JSON.
    pub debug: bool,
}

impl Config {
    /// Defaults for everything except the worker URL.
    pub fn with_worker_url(worker_url: impl Into<String>) -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            worker_url: worker_url.into(),
            stt_url: DEFAULT_STT_URL.to_string(),
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            callback_timeout: DEFAULT_CALLBACK_TIMEOUT,
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            registry_mode: RegistryMode::default(),
            tunnel_patterns: vec!["ngrok".to_string()],
            cors: CorsConfig::default(),
            debug: false,
        }
    }

    /// Load from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `RELAY_WORKER_URL` is missing or any variable is
    /// present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load through an arbitrary lookup (tests pass a map).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let worker_url = env
            .string("RELAY_WORKER_URL")
            .ok_or(ConfigError::Missing("RELAY_WORKER_URL"))?;
        let mut config = Self::with_worker_url(worker_url);

        if let Some(port) = env.parse::<u16>("RELAY_HTTP_PORT", "a u16")? {
            config.http_port = port;
        }
        if let Some(url) = env.string("RELAY_STT_URL") {
            config.stt_url = url;
        }
        if let Some(url) = env.string("RELAY_PUBLIC_URL") {
            config.public_url = url;
        }
        if let Some(path) = env.string("RELAY_CALLBACK_PATH") {
            config.callback_path = path;
        }
        if let Some(ms) = env.parse::<u64>("RELAY_CALLBACK_TIMEOUT_MS", "a u64")? {
            config.callback_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env.parse::<u64>("RELAY_WORKER_TIMEOUT_MS", "a u64")? {
            config.worker_timeout = Duration::from_millis(ms);
        }
        if let Some(mode) = env.string("RELAY_REGISTRY_MODE") {
            config.registry_mode =
                mode.parse::<RegistryMode>()
                    .map_err(|message| ConfigError::Invalid {
                        name: "RELAY_REGISTRY_MODE",
                        message: format!("must be one of: {message}"),
                    })?;
        }
        if let Some(patterns) = env.string("RELAY_TUNNEL_HOST_PATTERNS") {
            config.tunnel_patterns = split_list(&patterns);
        }
        if let Some(origins) = env.string("RELAY_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = split_list(&origins);
        }
        if let Some(max_age) = env.parse::<u64>("RELAY_CORS_MAX_AGE_SECONDS", "a u64")? {
            config.cors.max_age_seconds = max_age;
        }
        if let Some(debug) = env.bool("RELAY_DEBUG")? {
            config.debug = debug;
        }

        Ok(config)
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parse<T>(&self, name: &'static str, kind: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        v.parse::<T>().map(Some).map_err(|e| ConfigError::Invalid {
            name,
            message: format!("must be {kind}: {e}"),
        })
    }

    fn bool(&self, name: &'static str) -> Result<Option<bool>> {
        let Some(v) = self.string(name) else {
            return Ok(None);
        };
        match v.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => Ok(Some(true)),
            "false" | "0" | "no" | "n" => Ok(Some(false)),
            _ => Err(ConfigError::Invalid {
                name,
                message: "must be a boolean (true/false/1/0)".to_string(),
            }),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
