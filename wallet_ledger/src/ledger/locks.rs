//! Per-user mutual exclusion within one process.
//!
//! Mutations for the same user are serialized before a store transaction is
//! opened. Handles are created lazily; once the table grows past its capacity,
//! handles nobody holds or waits on are pruned.

use super::models::UserId;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Default number of handles kept before idle ones are pruned
pub const DEFAULT_LOCK_TABLE_CAPACITY: usize = 10_000;

/// Concurrency-safe map from user id to lock handle
#[derive(Clone)]
pub struct UserLockTable {
    inner: Arc<Mutex<LockMap>>,
}

struct LockMap {
    locks: HashMap<UserId, Arc<AsyncMutex<()>>>,
    capacity: usize,
}

/// Held lock for one user; released on drop, including during unwinding
#[derive(Debug)]
pub struct UserLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl UserLockTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOCK_TABLE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LockMap {
                locks: HashMap::new(),
                capacity: capacity.max(1),
            })),
        }
    }

    /// Wait for exclusive access to `user_id`
    pub async fn acquire(&self, user_id: UserId) -> UserLockGuard {
        let handle = self.handle(user_id);
        UserLockGuard {
            _guard: handle.lock_owned().await,
        }
    }

    /// Number of handles currently tracked
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, user_id: UserId) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        if map.locks.len() >= map.capacity && !map.locks.contains_key(&user_id) {
            // A handle only referenced by the map is neither held nor awaited.
            map.locks.retain(|_, handle| Arc::strong_count(handle) > 1);
        }

        map.locks.entry(user_id).or_default().clone()
    }
}

impl Default for UserLockTable {
    fn default() -> Self {
        Self::new()
    }
}
