//! Per-volume-name mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per volume name, created on first use.
///
/// Guards are held across command execution, so they must be async-aware.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl NameLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }

    /// Drop the entry for `name` if nobody holds or awaits it.
    pub fn prune(&self, name: &str) {
        self.locks
            .remove_if(name, |_, mutex| Arc::strong_count(mutex) == 1);
    }

    /// Number of names with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock entries exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = Arc::new(NameLocks::new());
        let guard = locks.lock("v1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("v1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_names_are_independent() {
        let locks = NameLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_secs(1), locks.lock("b"))
            .await
            .unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_held_locks() {
        let locks = NameLocks::new();
        let guard = locks.lock("v1").await;
        locks.prune("v1");
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.prune("v1");
        assert!(locks.is_empty());
    }
}
