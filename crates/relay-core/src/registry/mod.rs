//! PendingRegistry - correlation id → 待機中の caller
//!
//! submission path と callback path をつなぐ唯一の共有状態です。
//!
//! # 不変条件
//! - 1 つの correlation id に生きている waiter は高々 1 つ
//! - waiter の完了は高々 1 回（map からの remove と完了を同じ lock 区間で行う）
//! - 登録された waiter は必ず取り除かれる（callback / timeout / supersede / abandon）
//!
//! # ロック
//! `std::sync::Mutex` を使い、lock 中に `.await` しない。
//! oneshot の send は非同期処理を伴わないので lock 中でも安全。

mod waiter;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::domain::{CallbackOutcome, CorrelationId, WaitError};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};

use self::waiter::Waiter;
pub use self::waiter::Pending;

pub const SUPERSEDED_SAME_ID: &str = "request replaced by new request with same id";
pub const SUPERSEDED_SINGLE_SLOT: &str = "new request received, previous request cancelled";

/// Slot policy.
///
/// `Keyed` allows any number of jobs in flight. `SingleSlot` keeps at most one
/// waiter; each registration cancels whatever was pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryMode {
    #[default]
    Keyed,
    SingleSlot,
}

impl FromStr for RegistryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyed" => Ok(Self::Keyed),
            "single_slot" | "single-slot" => Ok(Self::SingleSlot),
            other => Err(format!("expected keyed or single_slot (got {other})")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No pending request found for request_id: {0}")]
    NotFound(CorrelationId),

    #[error("No pending request")]
    NoPending,
}

/// Diagnostic view of one waiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingEntry {
    pub request_id: CorrelationId,
    pub created_at: DateTime<Utc>,
    pub timeout_ms: u64,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<CorrelationId, Waiter>,
    next_seq: u64,
}

/// Process-wide table of suspended callers.
///
/// Cloning is cheap and every clone shares the same table.
#[derive(Clone)]
pub struct PendingRegistry {
    state: Arc<Mutex<RegistryState>>,
    mode: RegistryMode,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl PendingRegistry {
    pub fn new(mode: RegistryMode) -> Self {
        Self::with_ports(
            mode,
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    pub fn with_ports(
        mode: RegistryMode,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            mode,
            ids,
            clock,
        }
    }

    pub fn mode(&self) -> RegistryMode {
        self.mode
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Install a waiter and arm its expiry timer.
    ///
    /// A fresh id is generated when `id` is `None`. Whatever the policy
    /// displaces is rejected as superseded before this returns.
    ///
    /// # Panics
    /// Must be called from within a tokio runtime (the timer is a spawned task).
    pub fn register(
        &self,
        id: Option<CorrelationId>,
        timeout: Duration,
    ) -> (CorrelationId, Pending) {
        let id = id.unwrap_or_else(|| self.ids.generate());
        let created_at = self.clock.now();

        let mut guard = lock_state(&self.state);

        let displaced: Vec<Waiter> = match self.mode {
            RegistryMode::Keyed => guard.entries.remove(&id).into_iter().collect(),
            RegistryMode::SingleSlot => guard.entries.drain().map(|(_, w)| w).collect(),
        };
        let reason = match self.mode {
            RegistryMode::Keyed => SUPERSEDED_SAME_ID,
            RegistryMode::SingleSlot => SUPERSEDED_SINGLE_SLOT,
        };
        for old in displaced {
            tracing::warn!(
                request_id = %old.id,
                replaced_by = %id,
                reason,
                "superseding pending request"
            );
            old.settle(Err(WaitError::Superseded {
                reason: reason.to_string(),
            }));
        }

        let seq = guard.next_seq;
        guard.next_seq += 1;

        let (mut waiter, pending) = Waiter::new(id.clone(), seq, created_at, timeout);
        waiter.arm(self.spawn_timer(id.clone(), seq, timeout));
        guard.entries.insert(id.clone(), waiter);

        tracing::debug!(
            request_id = %id,
            timeout_ms = timeout.as_millis() as u64,
            pending = guard.entries.len(),
            "registered pending request"
        );
        (id, pending)
    }

    /// Resolve or reject the waiter for `id`.
    ///
    /// A missing entry is the normal outcome of a duplicate or late callback.
    pub fn complete(
        &self,
        id: &CorrelationId,
        outcome: CallbackOutcome,
    ) -> Result<(), RegistryError> {
        let waiter = lock_state(&self.state)
            .entries
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;
        waiter.settle(outcome.into_result());
        Ok(())
    }

    /// Complete whichever waiter registered first.
    ///
    /// Legacy path for callbacks that carry no request id. With several jobs
    /// in flight this can hand a result to the wrong caller.
    pub fn complete_oldest(&self, outcome: CallbackOutcome) -> Result<CorrelationId, RegistryError> {
        let waiter = {
            let mut guard = lock_state(&self.state);
            let oldest = guard
                .entries
                .values()
                .min_by_key(|w| w.seq)
                .map(|w| w.id.clone())
                .ok_or(RegistryError::NoPending)?;
            guard
                .entries
                .remove(&oldest)
                .ok_or(RegistryError::NoPending)?
        };
        let id = waiter.id.clone();
        waiter.settle(outcome.into_result());
        Ok(id)
    }

    /// Remove a waiter without delivering a result.
    ///
    /// Returns `false` when nothing was pending under `id`.
    pub fn abandon(&self, id: &CorrelationId) -> bool {
        let removed = lock_state(&self.state).entries.remove(id);
        match removed {
            Some(waiter) => {
                tracing::debug!(request_id = %id, "abandoned pending request");
                waiter.discard();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        lock_state(&self.state).entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock_state(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending waiters in registration order.
    pub fn snapshot(&self) -> Vec<PendingEntry> {
        let guard = lock_state(&self.state);
        let mut waiters: Vec<&Waiter> = guard.entries.values().collect();
        waiters.sort_by_key(|w| w.seq);
        waiters
            .into_iter()
            .map(|w| PendingEntry {
                request_id: w.id.clone(),
                created_at: w.created_at,
                timeout_ms: w.timeout.as_millis() as u64,
            })
            .collect()
    }

    fn spawn_timer(&self, id: CorrelationId, seq: u64, timeout: Duration) -> JoinHandle<()> {
        let state = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            expire(&state, &id, seq);
        })
    }
}

fn expire(state: &Weak<Mutex<RegistryState>>, id: &CorrelationId, seq: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let waiter = {
        let mut guard = lock_state(&state);
        // 同じ id で再登録されていたら新しい waiter には触らない
        if guard.entries.get(id).is_some_and(|w| w.seq == seq) {
            guard.entries.remove(id)
        } else {
            None
        }
    };
    match waiter {
        Some(waiter) => {
            tracing::warn!(
                request_id = %id,
                timeout_ms = waiter.timeout.as_millis() as u64,
                "pending request timed out"
            );
            waiter.expire();
        }
        None => tracing::debug!(request_id = %id, "timer fired after request was settled"),
    }
}

fn lock_state(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::json;

    const LONG: Duration = Duration::from_secs(30);

    fn actions(tag: &str) -> Vec<Action> {
        vec![Action(json!({ "play": [tag] }))]
    }

    fn id(raw: &str) -> CorrelationId {
        CorrelationId::new(raw)
    }

    #[tokio::test]
    async fn complete_resolves_the_waiter() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(None, LONG);

        registry
            .complete(&req, CallbackOutcome::Success(actions("video")))
            .unwrap();

        assert_eq!(pending.wait().await.unwrap(), actions("video"));
        assert!(!registry.contains(&req));
    }

    #[tokio::test]
    async fn generated_ids_are_distinct() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (a, _pa) = registry.register(None, LONG);
        let (b, _pb) = registry.register(None, LONG);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn failure_outcome_rejects_with_message() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(Some(id("req_1")), LONG);

        registry
            .complete(&req, CallbackOutcome::Failure("no speech".into()))
            .unwrap();

        assert_eq!(
            pending.wait().await,
            Err(WaitError::Failed("no speech".into()))
        );
    }

    #[tokio::test]
    async fn second_complete_is_not_found() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, _pending) = registry.register(Some(id("req_1")), LONG);

        registry
            .complete(&req, CallbackOutcome::Success(actions("a")))
            .unwrap();
        let second = registry.complete(&req, CallbackOutcome::Success(actions("b")));

        assert_eq!(second, Err(RegistryError::NotFound(req)));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let result = registry.complete(&id("req_x"), CallbackOutcome::Success(vec![]));
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn reregistering_an_id_supersedes_the_old_waiter() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (_, old) = registry.register(Some(id("req_1")), LONG);
        let (_, new) = registry.register(Some(id("req_1")), LONG);

        assert_eq!(
            old.wait().await,
            Err(WaitError::Superseded {
                reason: SUPERSEDED_SAME_ID.to_string()
            })
        );
        assert_eq!(registry.len(), 1);

        registry
            .complete(&id("req_1"), CallbackOutcome::Success(actions("new")))
            .unwrap();
        assert_eq!(new.wait().await.unwrap(), actions("new"));
    }

    #[tokio::test]
    async fn unanswered_waiter_times_out_and_is_removed() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let timeout = Duration::from_millis(50);
        let (req, pending) = registry.register(None, timeout);

        assert_eq!(
            pending.wait().await,
            Err(WaitError::TimedOut { after: timeout })
        );
        assert!(!registry.contains(&req));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn callback_after_timeout_is_not_found() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(None, Duration::from_millis(20));
        assert!(pending.wait().await.is_err());

        let late = registry.complete(&req, CallbackOutcome::Success(vec![]));
        assert!(matches!(late, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn old_timer_never_expires_a_newer_waiter() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (_, old) = registry.register(Some(id("req_1")), Duration::from_millis(30));
        let (_, _new) = registry.register(Some(id("req_1")), LONG);
        assert!(old.wait().await.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.contains(&id("req_1")));
    }

    #[tokio::test]
    async fn single_slot_cancels_whatever_is_pending() {
        let registry = PendingRegistry::new(RegistryMode::SingleSlot);
        let (_, first) = registry.register(Some(id("req_1")), LONG);
        let (second_id, second) = registry.register(Some(id("req_2")), LONG);

        assert_eq!(
            first.wait().await,
            Err(WaitError::Superseded {
                reason: SUPERSEDED_SINGLE_SLOT.to_string()
            })
        );
        assert_eq!(registry.len(), 1);

        registry
            .complete(&second_id, CallbackOutcome::Success(actions("two")))
            .unwrap();
        assert_eq!(second.wait().await.unwrap(), actions("two"));
    }

    #[tokio::test]
    async fn complete_oldest_follows_registration_order() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        // 辞書順と登録順が逆になるようにする
        let (_, first) = registry.register(Some(id("req_b")), LONG);
        let (_, second) = registry.register(Some(id("req_a")), LONG);

        let picked = registry
            .complete_oldest(CallbackOutcome::Success(actions("one")))
            .unwrap();

        assert_eq!(picked, id("req_b"));
        assert_eq!(first.wait().await.unwrap(), actions("one"));
        assert!(registry.contains(&id("req_a")));

        let picked = registry
            .complete_oldest(CallbackOutcome::Success(actions("two")))
            .unwrap();
        assert_eq!(picked, id("req_a"));
        assert_eq!(second.wait().await.unwrap(), actions("two"));
    }

    #[tokio::test]
    async fn complete_oldest_on_empty_registry() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        assert_eq!(
            registry.complete_oldest(CallbackOutcome::Success(vec![])),
            Err(RegistryError::NoPending)
        );
    }

    #[tokio::test]
    async fn abandon_drops_without_result() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(None, LONG);

        assert!(registry.abandon(&req));
        assert!(!registry.abandon(&req));
        assert_eq!(pending.wait().await, Err(WaitError::Abandoned));
    }

    #[tokio::test]
    async fn completing_for_a_departed_caller_still_removes_entry() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(None, LONG);
        drop(pending);

        assert!(registry.complete(&req, CallbackOutcome::Success(vec![])).is_ok());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn snapshot_lists_in_registration_order() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(at));
        let registry = PendingRegistry::with_ports(
            RegistryMode::Keyed,
            Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        );
        let (_, _p1) = registry.register(Some(id("req_z")), LONG);
        let (_, _p2) = registry.register(Some(id("req_a")), Duration::from_millis(500));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].request_id, id("req_z"));
        assert_eq!(snapshot[1].request_id, id("req_a"));
        assert_eq!(snapshot[1].timeout_ms, 500);
        assert_eq!(snapshot[0].created_at, at);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_completes_settle_exactly_once() {
        let registry = PendingRegistry::new(RegistryMode::Keyed);
        let (req, pending) = registry.register(None, LONG);

        let mut joins = Vec::new();
        for n in 0..16 {
            let registry = registry.clone();
            let req = req.clone();
            joins.push(tokio::spawn(async move {
                registry
                    .complete(&req, CallbackOutcome::Success(actions(&n.to_string())))
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for join in joins {
            if join.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(pending.wait().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_and_callback_race_has_one_winner() {
        for _ in 0..20 {
            let registry = PendingRegistry::new(RegistryMode::Keyed);
            let timeout = Duration::from_millis(10);
            let (req, pending) = registry.register(None, timeout);

            let completer = {
                let registry = registry.clone();
                let req = req.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    registry.complete(&req, CallbackOutcome::Success(actions("late")))
                })
            };

            let waited = pending.wait().await;
            let completed = completer.await.unwrap();
            match completed {
                Ok(()) => assert_eq!(waited.unwrap(), actions("late")),
                Err(RegistryError::NotFound(_)) => {
                    assert_eq!(waited, Err(WaitError::TimedOut { after: timeout }))
                }
                Err(other) => panic!("unexpected: {other}"),
            }
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn registry_mode_parses_from_config_values() {
        assert_eq!("keyed".parse::<RegistryMode>().unwrap(), RegistryMode::Keyed);
        assert_eq!(
            " Single_Slot ".parse::<RegistryMode>().unwrap(),
            RegistryMode::SingleSlot
        );
        assert!("fifo".parse::<RegistryMode>().is_err());
    }
}
