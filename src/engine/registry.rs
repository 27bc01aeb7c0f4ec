use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-pair cycle serialization. The registry mapping `pair_id -> mutex` is
/// itself behind a mutex to avoid races on first-use creation; the per-pair
/// mutex is acquired with `try_lock`, never awaited, so an already-running
/// cycle for the same pair causes the new invocation to skip rather than
/// queue.
#[derive(Default)]
pub struct PairLockRegistry {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl PairLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock for `pair_id` without waiting. `None`
    /// means a cycle for this pair is already in flight.
    pub async fn try_acquire(&self, pair_id: i64) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(pair_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_while_held_is_skipped() {
        let registry = PairLockRegistry::new();
        let guard = registry.try_acquire(1).await;
        assert!(guard.is_some());
        assert!(registry.try_acquire(1).await.is_none());
    }

    #[tokio::test]
    async fn release_allows_reacquire() {
        let registry = PairLockRegistry::new();
        {
            let _guard = registry.try_acquire(1).await.unwrap();
        }
        assert!(registry.try_acquire(1).await.is_some());
    }

    #[tokio::test]
    async fn different_pairs_do_not_contend() {
        let registry = PairLockRegistry::new();
        let _a = registry.try_acquire(1).await.unwrap();
        assert!(registry.try_acquire(2).await.is_some());
    }
}
