//! Per-cluster upgrade locks
//!
//! At most one plan may execute against a cluster at a time. Acquisition never
//! waits: a second caller is refused with `ConcurrentUpgradeInProgress`.

use crate::error::OrchestratorError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Registry of clusters that currently have an upgrade in flight
#[derive(Debug, Clone, Default)]
pub struct UpgradeLocks {
    held: Arc<Mutex<HashMap<String, Uuid>>>,
}

impl UpgradeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `cluster_id` or fail immediately
    pub fn try_acquire(&self, cluster_id: &str) -> Result<UpgradeGuard, OrchestratorError> {
        let mut held = self.held();
        if held.contains_key(cluster_id) {
            return Err(OrchestratorError::ConcurrentUpgradeInProgress {
                cluster_id: cluster_id.to_string(),
            });
        }
        let token = Uuid::new_v4();
        held.insert(cluster_id.to_string(), token);
        debug!(cluster_id = %cluster_id, token = %token, "Upgrade lock acquired");

        Ok(UpgradeGuard {
            locks: self.clone(),
            cluster_id: cluster_id.to_string(),
            token,
        })
    }

    /// Whether an upgrade currently holds `cluster_id`
    pub fn is_locked(&self, cluster_id: &str) -> bool {
        self.held().contains_key(cluster_id)
    }

    fn held(&self) -> MutexGuard<'_, HashMap<String, Uuid>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held while an upgrade runs; releases the cluster on drop
#[derive(Debug)]
pub struct UpgradeGuard {
    locks: UpgradeLocks,
    cluster_id: String,
    token: Uuid,
}

impl UpgradeGuard {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }
}

impl Drop for UpgradeGuard {
    fn drop(&mut self) {
        let mut held = self.locks.held();
        if held.get(&self.cluster_id) == Some(&self.token) {
            held.remove(&self.cluster_id);
            debug!(cluster_id = %self.cluster_id, "Upgrade lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_refused() {
        let locks = UpgradeLocks::new();
        let _guard = locks.try_acquire("prod").unwrap();

        let err = locks.try_acquire("prod").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConcurrentUpgradeInProgress { cluster_id } if cluster_id == "prod"));
    }

    #[test]
    fn test_released_on_drop() {
        let locks = UpgradeLocks::new();
        {
            let guard = locks.try_acquire("prod").unwrap();
            assert_eq!(guard.cluster_id(), "prod");
            assert!(locks.is_locked("prod"));
        }
        assert!(!locks.is_locked("prod"));
        assert!(locks.try_acquire("prod").is_ok());
    }

    #[test]
    fn test_clusters_are_independent() {
        let locks = UpgradeLocks::new();
        let _a = locks.try_acquire("a").unwrap();
        assert!(locks.try_acquire("b").is_ok());
    }
}
