//! Per-key async mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Set of async mutexes created on demand, one per key.
///
/// Each entry counts the holder and waiters interested in it and is removed
/// when that count reaches zero, including when a waiter is cancelled.
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Slot>>,
}

#[derive(Debug)]
struct Slot {
    mutex: Arc<Mutex<()>>,
    interested: usize,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut slot = self.locks.entry(key.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(Mutex::new(())),
                interested: 0,
            });
            slot.interested += 1;
            Arc::clone(&slot.mutex)
        };
        let interest = Interest {
            locks: Arc::clone(&self.locks),
            key: key.to_string(),
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            _guard: guard,
            _interest: interest,
        }
    }

    /// Number of keys currently locked or awaited.
    #[must_use]
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Held lock on one key. Released on drop.
#[derive(Debug)]
pub struct KeyGuard {
    // field order matters: unlock before giving up interest
    _guard: OwnedMutexGuard<()>,
    _interest: Interest,
}

#[derive(Debug)]
struct Interest {
    locks: Arc<DashMap<String, Slot>>,
    key: String,
}

impl Drop for Interest {
    fn drop(&mut self) {
        self.locks.remove_if_mut(&self.key, |_, slot| {
            slot.interested -= 1;
            slot.interested == 0
        });
    }
}
