//! Per-key async mutex.
//!
//! Two taps of the same chip can land within milliseconds of each other
//! (two tabs, a double read on the reader). Both derive the same identity,
//! but both also read-modify-write the same account record. [`KeyedLock`]
//! queues them: the second waits for the first to finish its write, then
//! reads the updated record. Different keys never contend.
//!
//! An entry lives only while someone holds or waits on it. The last guard
//! to drop removes it, so a long-running node tracks in-flight chips, not
//! every chip it has ever seen.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created per-key mutexes.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Waiters are served in FIFO order (tokio's mutex is fair). The guard
    /// releases on drop.
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            owner: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Remove `key` if the map holds the only reference to its mutex.
    ///
    /// `remove_if` holds the shard lock, and `lock` clones under that same
    /// lock, so no waiter can appear between the count check and removal.
    fn release(&self, key: &str) {
        self.locks.remove_if(key, |_, m| Arc::strong_count(m) == 1);
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLock`].
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLock,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Unlock first so our own clone no longer counts.
        drop(self.guard.take());
        self.owner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn serializes_read_modify_write() {
        let lock = Arc::new(KeyedLock::new());
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let _guard = lock.lock("04:A1:B2:C3").await;
                // Deliberately non-atomic read-modify-write with a yield in
                // between; without the lock this loses updates.
                let current = counter.load(Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.store(current + 1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), lock.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn same_key_blocks_until_released() {
        let lock = KeyedLock::new();
        let guard = lock.lock("a").await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), lock.lock("a")).await;
        assert!(blocked.is_err());
        drop(guard);
        let acquired = tokio::time::timeout(Duration::from_millis(50), lock.lock("a")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn released_keys_leave_the_map() {
        let lock = KeyedLock::new();
        for i in 0..500 {
            drop(lock.lock(&format!("04:00:{:02X}:{:02X}", i / 256, i % 256)).await);
        }
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_a_waiter_is_queued() {
        let lock = Arc::new(KeyedLock::new());
        let held = lock.lock("a").await;

        let waiter = {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                let _g = lock.lock("a").await;
                lock.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(lock.len(), 1);

        drop(held);
        // The waiter still sees its own entry while holding the guard.
        assert_eq!(waiter.await.unwrap(), 1);
        assert!(lock.is_empty());
    }

    #[tokio::test]
    async fn held_key_is_tracked_until_dropped() {
        let lock = KeyedLock::new();
        let held = lock.lock("held").await;
        drop(lock.lock("idle").await);
        assert_eq!(lock.len(), 1);
        drop(held);
        assert!(lock.is_empty());
    }
}
