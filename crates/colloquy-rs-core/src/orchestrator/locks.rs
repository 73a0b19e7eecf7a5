//! Per-thread async locks.

use crate::types::ThreadId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per thread id; unrelated threads never contend.
#[derive(Debug, Default)]
pub(crate) struct ThreadLocks {
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThreadLocks {
    pub(crate) async fn lock(&self, thread_id: ThreadId) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(thread_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the thread's mutex when nobody holds or awaits it.
    pub(crate) fn evict_idle(&self, thread_id: ThreadId) -> bool {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(&thread_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&thread_id);
        }
        idle
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadLocks;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn same_thread_waits_other_thread_does_not() {
        let locks = ThreadLocks::default();
        let busy = Uuid::new_v4();
        let _held = locks.lock(busy).await;

        let other = tokio::time::timeout(Duration::from_millis(200), locks.lock(Uuid::new_v4())).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(busy)).await;
        assert!(same.is_err());
    }

    #[tokio::test]
    async fn evict_skips_held_locks() {
        let locks = ThreadLocks::default();
        let thread_id = Uuid::new_v4();
        let guard = locks.lock(thread_id).await;
        assert!(!locks.evict_idle(thread_id));
        assert_eq!(locks.locks.lock().len(), 1);

        drop(guard);
        assert!(locks.evict_idle(thread_id));
        assert!(locks.locks.lock().is_empty());
        assert!(!locks.evict_idle(thread_id));
    }
}
