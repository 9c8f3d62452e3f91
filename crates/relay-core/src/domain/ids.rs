//! Correlation identifiers.
//!
//! # ID の形式
//! 生成される ID は `req_<ULID>` です。
//! - **時刻でソート可能**: ULID の先頭 48bit が timestamp
//! - **推測困難**: 残り 80bit がランダム（暗号学的な秘密としては扱わない）
//!
//! worker から返ってくる ID はそのまま受け付けます（`req_1` など任意の文字列）。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Prefix for generated ids.
pub const CORRELATION_PREFIX: &str = "req_";

/// Opaque token linking an asynchronous callback to the job that spawned it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap an externally supplied id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build a generated id from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("{CORRELATION_PREFIX}{ulid}"))
    }

    /// Parse an id coming off the wire (query string or callback body).
    ///
    /// Blank values count as "no id".
    pub fn parse_opt(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
