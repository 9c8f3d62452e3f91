//! Waiter と Pending（caller 側の待ち受けハンドル）
//!
//! 1 回の登録で oneshot channel を 1 本作り、
//! - 送信側（`Waiter`）は registry が保持
//! - 受信側（`Pending`）は submission path が保持して await する
//!
//! `Waiter::settle` は `self` を消費するので、同じ waiter を二度完了させることは型で防がれる。

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::domain::{Action, CorrelationId, WaitError};

pub(crate) type WaitResult = Result<Vec<Action>, WaitError>;

/// One suspended caller, as seen from the registry.
pub(crate) struct Waiter {
    pub(crate) id: CorrelationId,
    /// Registration order; also guards stale timers.
    pub(crate) seq: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) timeout: Duration,
    tx: oneshot::Sender<WaitResult>,
    timer: Option<JoinHandle<()>>,
}

impl Waiter {
    pub(crate) fn new(
        id: CorrelationId,
        seq: u64,
        created_at: DateTime<Utc>,
        timeout: Duration,
    ) -> (Self, Pending) {
        let (tx, rx) = oneshot::channel();
        let waiter = Self {
            id: id.clone(),
            seq,
            created_at,
            timeout,
            tx,
            timer: None,
        };
        (waiter, Pending { id, rx })
    }

    pub(crate) fn arm(&mut self, timer: JoinHandle<()>) {
        self.timer = Some(timer);
    }

    /// Cancel the expiry timer and wake the caller.
    ///
    /// Must only be called after the waiter has left the registry map.
    pub(crate) fn settle(mut self, result: WaitResult) {
        self.disarm();
        let outcome = if result.is_ok() { "resolved" } else { "rejected" };
        if self.tx.send(result).is_err() {
            tracing::warn!(
                request_id = %self.id,
                outcome,
                "caller stopped waiting before the result was delivered"
            );
        } else {
            tracing::debug!(request_id = %self.id, outcome, "pending request settled");
        }
    }

    /// Settle from inside the expiry timer task itself (nothing left to abort).
    pub(crate) fn expire(mut self) {
        self.timer.take();
        let after = self.timeout;
        self.settle(Err(WaitError::TimedOut { after }));
    }

    /// Drop without delivering anything; the caller sees `WaitError::Abandoned`.
    pub(crate) fn discard(mut self) {
        self.disarm();
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Awaitable handle returned by `PendingRegistry::register`.
#[derive(Debug)]
pub struct Pending {
    id: CorrelationId,
    rx: oneshot::Receiver<WaitResult>,
}

impl Pending {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Suspend until the waiter is resolved, rejected, or expires.
    pub async fn wait(self) -> Result<Vec<Action>, WaitError> {
        self.rx.await.unwrap_or(Err(WaitError::Abandoned))
    }
}
