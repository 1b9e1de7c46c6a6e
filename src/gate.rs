//! Process-wide admission control for backend calls.
//! A counting permit pool: at most `max_concurrency` permits are outstanding,
//! no matter how many runs or sessions share the gate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

pub struct ConcurrencyGate {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    next_id: AtomicU64,
}

impl ConcurrencyGate {
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            next_id: AtomicU64::new(1),
        }
    }

    /// Wait up to `timeout` for a permit. `None` means the gate is saturated
    /// and the caller must not contact the backend.
    pub async fn try_acquire(&self, timeout: Duration) -> Option<PermitToken> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(permit_id = id, in_flight = self.in_flight(), "permit acquired");
                Some(PermitToken {
                    id,
                    permit: Mutex::new(Some(permit)),
                    released: AtomicBool::new(false),
                })
            }
            // Closed semaphore or timeout: both refuse admission.
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.max_concurrency - self.permits.available_permits()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

/// One admission unit. Release is guarded by an atomic flag so that the
/// completion path and the timeout path can both call [`PermitToken::release`]
/// and only the first one returns the permit. Dropping an unreleased token
/// releases it too.
pub struct PermitToken {
    id: u64,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
    released: AtomicBool,
}

impl PermitToken {
    /// Returns `true` only for the call that actually released the permit.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.permit.lock().take());
        debug!(permit_id = self.id, "permit released");
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for PermitToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitToken")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn refuses_when_saturated() {
        let gate = ConcurrencyGate::new(1);
        let first = gate.try_acquire(SHORT).await;
        assert!(first.is_some());
        assert!(gate.try_acquire(SHORT).await.is_none());
        assert_eq!(gate.in_flight(), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let gate = ConcurrencyGate::new(2);
        let token = gate.try_acquire(SHORT).await.unwrap();
        assert_eq!(gate.in_flight(), 1);
        assert!(token.release());
        assert!(!token.release());
        assert!(token.is_released());
        assert_eq!(gate.in_flight(), 0);

        // the freed slot is reusable and the double release did not mint an extra one
        let a = gate.try_acquire(SHORT).await.unwrap();
        let b = gate.try_acquire(SHORT).await.unwrap();
        assert!(gate.try_acquire(SHORT).await.is_none());
        drop((a, b));
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn racing_releases_free_one_permit() {
        let gate = ConcurrencyGate::new(1);
        let token = Arc::new(gate.try_acquire(SHORT).await.unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let t = Arc::clone(&token);
            handles.push(tokio::spawn(async move { t.release() }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn waiter_is_admitted_after_release() {
        let gate = Arc::new(ConcurrencyGate::new(1));
        let token = gate.try_acquire(SHORT).await.unwrap();
        let g = Arc::clone(&gate);
        let waiter = tokio::spawn(async move { g.try_acquire(Duration::from_secs(2)).await.is_some() });
        tokio::time::sleep(SHORT).await;
        token.release();
        assert!(waiter.await.unwrap());
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        assert_eq!(ConcurrencyGate::new(0).max_concurrency(), 1);
    }
}
