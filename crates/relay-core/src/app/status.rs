//! Status - 待機中リクエストの診断ビュー

use serde::Serialize;

use crate::registry::{PendingRegistry, RegistryMode};

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub mode: RegistryMode,
    pub pending: usize,
    pub requests: Vec<PendingRequestStatus>,
}

/// One waiter, without its request id.
///
/// Ids are the only thing that ties a callback to a caller, so this public
/// view never carries them.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequestStatus {
    pub created_at: String,
    pub age_ms: i64,
    pub timeout_ms: u64,
}

impl RegistryStatus {
    pub fn capture(registry: &PendingRegistry) -> Self {
        let now = registry.clock().now();
        let requests: Vec<PendingRequestStatus> = registry
            .snapshot()
            .into_iter()
            .map(|entry| PendingRequestStatus {
                age_ms: (now - entry.created_at).num_milliseconds().max(0),
                created_at: entry.created_at.to_rfc3339(),
                timeout_ms: entry.timeout_ms,
            })
            .collect();
        Self {
            mode: registry.mode(),
            pending: requests.len(),
            requests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, UlidGenerator};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn status_reports_pending_requests() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(at));
        let registry = PendingRegistry::with_ports(
            RegistryMode::SingleSlot,
            Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        );
        let (id, _pending) = registry.register(None, Duration::from_secs(30));

        let status = RegistryStatus::capture(&registry);
        assert_eq!(status.mode, RegistryMode::SingleSlot);
        assert_eq!(status.pending, 1);
        assert_eq!(status.requests[0].age_ms, 0);
        assert_eq!(status.requests[0].timeout_ms, 30_000);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["mode"], "single_slot");
        assert!(json["requests"][0].get("request_id").is_none());
        assert!(!json.to_string().contains(id.as_str()));
    }

    #[test]
    fn empty_registry_status() {
        let status = RegistryStatus::capture(&PendingRegistry::new(RegistryMode::Keyed));
        assert_eq!(status.pending, 0);
        assert!(status.requests.is_empty());
    }
}
