//! Callback origin validation.
//!
//! A best-effort allow-list over client supplied headers and the peer
//! address. It is not authentication: anyone who can forge a `Referer` header
//! passes signal 1. Deployments that need more should put a bearer token in
//! the callback URL as well.
//!
//! Signals, evaluated in order, first match wins:
//! 1. `Referer` / `Origin` host equals the worker host, or the broker's own
//!    public host when that host matches a tunnel pattern (ngrok and friends).
//! 2. The worker host is local (loopback, private range, single-label service
//!    name) and the caller is local too: either the Referer/Origin host or the
//!    client address (`X-Forwarded-For` first hop, `X-Real-IP`, socket peer).
//! 3. `X-Forwarded-Host` contains, or is contained in, an allowed host.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use axum::http::HeaderMap;
use axum::http::header::{ORIGIN, REFERER};
use reqwest::Url;

pub const DEFAULT_TUNNEL_PATTERNS: &[&str] = &["ngrok"];

/// Transport metadata of an inbound callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMeta {
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub forwarded_host: Option<String>,
    pub forwarded_for: Option<String>,
    pub real_ip: Option<String>,
    pub peer: Option<IpAddr>,
}

impl RequestMeta {
    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            referer: get(REFERER.as_str()),
            origin: get(ORIGIN.as_str()),
            forwarded_host: get("x-forwarded-host"),
            forwarded_for: get("x-forwarded-for"),
            real_ip: get("x-real-ip"),
            peer,
        }
    }

    /// Referer, falling back to Origin.
    fn referrer(&self) -> Option<&str> {
        self.referer.as_deref().or(self.origin.as_deref())
    }

    fn referrer_host(&self) -> Option<String> {
        self.referrer().and_then(hostname_of)
    }

    /// Best guess at the caller's address: first forwarded hop, real-ip, peer.
    fn client_ip(&self) -> Option<IpAddr> {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(raw) = forwarded.or(self.real_ip.as_deref()) {
            return parse_ip(raw);
        }
        self.peer
    }

    fn client_ip_display(&self) -> String {
        self.forwarded_for
            .clone()
            .or_else(|| self.real_ip.clone())
            .or_else(|| self.peer.map(|ip| ip.to_string()))
            .unwrap_or_default()
    }
}

/// Decides whether a callback plausibly came from the trusted worker.
#[derive(Debug, Clone)]
pub struct OriginValidator {
    worker_host: Option<String>,
    allowed_hosts: Vec<String>,
}

impl OriginValidator {
    /// Build from configured URLs. Unparseable URLs contribute no host.
    pub fn new(worker_url: &str, public_url: &str, tunnel_patterns: &[String]) -> Self {
        let worker_host = hostname_of(worker_url);
        if worker_host.is_none() {
            tracing::error!(worker_url, "worker URL has no hostname; callbacks will be rejected");
        }

        let mut allowed_hosts: Vec<String> = worker_host.iter().cloned().collect();
        if let Some(public_host) = hostname_of(public_url) {
            let tunneled = tunnel_patterns
                .iter()
                .filter(|p| !p.is_empty())
                .any(|p| public_host.contains(p.as_str()));
            if tunneled && !allowed_hosts.contains(&public_host) {
                allowed_hosts.push(public_host);
            }
        }

        Self {
            worker_host,
            allowed_hosts,
        }
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    pub fn is_trusted(&self, meta: &RequestMeta) -> bool {
        let referrer_host = meta.referrer_host();

        if let Some(host) = &referrer_host
            && self.allowed_hosts.iter().any(|allowed| allowed == host)
        {
            return true;
        }

        if self.worker_host.as_deref().is_some_and(is_local_host) {
            if referrer_host.as_deref().is_some_and(is_local_host) {
                return true;
            }
            if meta.client_ip().is_some_and(is_local_ip) {
                return true;
            }
        }

        if let Some(forwarded) = meta.forwarded_host.as_deref() {
            let forwarded = strip_port(forwarded).to_ascii_lowercase();
            if !forwarded.is_empty()
                && self.allowed_hosts.iter().any(|host| {
                    forwarded.contains(host.as_str()) || host.contains(forwarded.as_str())
                })
            {
                return true;
            }
        }

        tracing::warn!(
            expected_hosts = ?self.allowed_hosts,
            referer = meta.referrer().unwrap_or_default(),
            forwarded_host = meta.forwarded_host.as_deref().unwrap_or_default(),
            client_ip = %meta.client_ip_display(),
            "callback origin validation failed"
        );
        false
    }
}

/// One-shot form of `OriginValidator::is_trusted` with the default tunnel patterns.
pub fn is_trusted_origin(meta: &RequestMeta, worker_url: &str, public_url: &str) -> bool {
    let patterns: Vec<String> = DEFAULT_TUNNEL_PATTERNS.iter().map(|p| p.to_string()).collect();
    OriginValidator::new(worker_url, public_url, &patterns).is_trusted(meta)
}

fn hostname_of(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;
    // IPv6 literals come back bracketed
    let host = host.trim_start_matches('[').trim_end_matches(']');
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    let host = host.trim();
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default();
    }
    match host.rsplit_once(':') {
        // 素の IPv6（コロン複数）はそのまま
        Some((name, _)) if !name.contains(':') => name,
        _ => host,
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<std::net::SocketAddr>().ok().map(|s| s.ip()))
}

fn is_local_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }
    if let Some(ip) = parse_ip(host) {
        return is_local_ip(ip);
    }
    // docker compose などのサービス名（ドットなし）
    !host.contains('.') && !host.is_empty()
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local()
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
