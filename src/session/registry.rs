//! Session registry
//!
//! Maps scope ids to live sessions with an acquire/release discipline. A
//! second request for a number that already has an in-flight session
//! supersedes it: the old driver task is aborted and its scope is purged by
//! the new session's open. Epochs keep a superseded session's release from
//! evicting its successor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::AuthScope;

/// Proof of registration for one session attempt. Cheap to clone; carried
/// into the driver task so release happens exactly where the session ends.
#[derive(Debug, Clone)]
pub struct SessionLease {
    scope_id: String,
    epoch: u64,
}

impl SessionLease {
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }
}

struct LiveSession {
    epoch: u64,
    scope: Option<Arc<AuthScope>>,
    driver: Option<JoinHandle<()>>,
}

/// Registry of in-flight pairing sessions.
#[derive(Default)]
pub struct SessionRegistry {
    live: DashMap<String, LiveSession>,
    epochs: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session for `scope_id`, superseding any prior one.
    pub fn acquire(&self, scope_id: &str) -> SessionLease {
        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some((_, prior)) = self.live.remove(scope_id) {
            warn!(scope = %scope_id, "Superseding in-flight session");
            if let Some(driver) = prior.driver {
                driver.abort();
            }
            // The prior scope directory is purged by the new session's open.
        }

        self.live.insert(
            scope_id.to_string(),
            LiveSession {
                epoch,
                scope: None,
                driver: None,
            },
        );

        SessionLease {
            scope_id: scope_id.to_string(),
            epoch,
        }
    }

    /// Record the scope backing a lease, so shutdown can destroy it.
    pub fn set_scope(&self, lease: &SessionLease, scope: Arc<AuthScope>) {
        if let Some(mut entry) = self.live.get_mut(&lease.scope_id) {
            if entry.epoch == lease.epoch {
                entry.scope = Some(scope);
            }
        }
    }

    /// Record the driver task for a lease. If the lease was superseded in
    /// the meantime, the freshly spawned driver is aborted immediately.
    pub fn attach_driver(&self, lease: &SessionLease, driver: JoinHandle<()>) {
        match self.live.get_mut(&lease.scope_id) {
            Some(mut entry) if entry.epoch == lease.epoch => {
                entry.driver = Some(driver);
            }
            _ => {
                debug!(scope = %lease.scope_id, "Lease superseded before driver attach");
                driver.abort();
            }
        }
    }

    /// Whether a lease still owns its scope (i.e. has not been superseded).
    pub fn is_current(&self, lease: &SessionLease) -> bool {
        self.live
            .get(&lease.scope_id)
            .map_or(false, |entry| entry.epoch == lease.epoch)
    }

    /// Release a lease. A superseded lease's release is a no-op.
    pub fn release(&self, lease: &SessionLease) {
        self.live
            .remove_if(&lease.scope_id, |_, entry| entry.epoch == lease.epoch);
    }

    /// Number of in-flight sessions.
    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    /// Tear down every in-flight session: abort drivers and destroy their
    /// scopes. Called on process shutdown.
    pub async fn drain(&self) {
        let scope_ids: Vec<String> = self.live.iter().map(|e| e.key().clone()).collect();
        for scope_id in scope_ids {
            if let Some((_, entry)) = self.live.remove(&scope_id) {
                if let Some(driver) = entry.driver {
                    driver.abort();
                }
                if let Some(scope) = entry.scope {
                    let _ = scope.destroy().await;
                }
                info!(scope = %scope_id, "Drained in-flight session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_cycle() {
        let registry = SessionRegistry::new();
        let lease = registry.acquire("15551234567");
        assert_eq!(registry.active_count(), 1);
        registry.release(&lease);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_superseded_release_is_noop() {
        let registry = SessionRegistry::new();
        let first = registry.acquire("15551234567");
        let second = registry.acquire("15551234567");
        assert_eq!(registry.active_count(), 1);

        // The stale lease must not evict its successor
        registry.release(&first);
        assert_eq!(registry.active_count(), 1);

        registry.release(&second);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_distinct_scopes_coexist() {
        let registry = SessionRegistry::new();
        let a = registry.acquire("15551234567");
        let b = registry.acquire("447911123456");
        assert_eq!(registry.active_count(), 2);
        registry.release(&a);
        registry.release(&b);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_acquire_aborts_prior_driver() {
        let registry = SessionRegistry::new();
        let lease = registry.acquire("15551234567");
        let driver = tokio::spawn(async {
            // Would run forever if not aborted
            std::future::pending::<()>().await;
        });
        registry.attach_driver(&lease, driver);

        let _second = registry.acquire("15551234567");

        // The superseded driver ends with a cancellation, not completion
        let entry = registry.live.get("15551234567").unwrap();
        assert!(entry.driver.is_none());
        drop(entry);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_drain_destroys_scopes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = crate::store::EphemeralStore::new(tmp.path());
        let registry = SessionRegistry::new();

        let lease = registry.acquire("15551234567");
        let scope = Arc::new(store.open("15551234567").await.unwrap());
        registry.set_scope(&lease, Arc::clone(&scope));

        registry.drain().await;
        assert_eq!(registry.active_count(), 0);
        assert!(!scope.dir().exists());
    }
}
