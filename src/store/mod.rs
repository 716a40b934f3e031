//! Ephemeral session scope storage
//!
//! One directory per pairing attempt under a configurable root. The file
//! format inside a scope belongs to the socket provider; the core reads only
//! the final credential blob as raw bytes. Opening a scope purges whatever a
//! prior attempt left behind, and destruction is guarded so it runs at most
//! once per scope handle.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::fs;
use tracing::{debug, info, warn};
use zeroize::ZeroizeOnDrop;

use crate::types::{PairwayError, Result};

/// File name of the serialized credential blob inside a scope.
pub const CREDENTIAL_FILE: &str = "creds.json";

/// Captured credential material. Never logged, never echoed; the backing
/// buffer is zeroized when dropped.
#[derive(ZeroizeOnDrop)]
pub struct CredentialSnapshot {
    bytes: Vec<u8>,
}

impl CredentialSnapshot {
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for CredentialSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Redacted on purpose
        write!(f, "CredentialSnapshot({} bytes)", self.bytes.len())
    }
}

/// Factory for per-session auth scopes under a single root directory.
pub struct EphemeralStore {
    root: PathBuf,
}

impl EphemeralStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh scope for `scope_id`.
    ///
    /// Any prior on-disk state for the scope is purged first; stale
    /// credential material is never reused across attempts.
    pub async fn open(&self, scope_id: &str) -> Result<AuthScope> {
        let dir = self.root.join(scope_id);

        fs::remove_dir_all(&dir).await.ok();
        fs::create_dir_all(&dir).await?;

        info!(scope = %scope_id, "Opened fresh session scope");

        Ok(AuthScope {
            scope_id: scope_id.to_string(),
            dir,
            destroyed: AtomicBool::new(false),
        })
    }
}

/// Handle to one live session scope.
///
/// Exclusively owned by the session that opened it. The provider adapter
/// writes credential material in; the controller reads it back out and
/// destroys the scope on every terminal transition.
pub struct AuthScope {
    scope_id: String,
    dir: PathBuf,
    destroyed: AtomicBool,
}

impl AuthScope {
    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist credential material into the scope. Provider-side surface;
    /// the core never calls this directly.
    pub async fn write_credentials(&self, bytes: &[u8]) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PairwayError::Store(format!(
                "scope {} already destroyed",
                self.scope_id
            )));
        }
        fs::write(self.dir.join(CREDENTIAL_FILE), bytes).await?;
        debug!(scope = %self.scope_id, len = bytes.len(), "Credential material written");
        Ok(())
    }

    /// Read the captured credential blob.
    ///
    /// `NotReady` until the provider has written a non-empty blob.
    pub async fn read_credential_snapshot(&self) -> Result<CredentialSnapshot> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(PairwayError::NotReady);
        }
        match fs::read(self.dir.join(CREDENTIAL_FILE)).await {
            Ok(bytes) if bytes.is_empty() => Err(PairwayError::NotReady),
            Ok(bytes) => Ok(CredentialSnapshot { bytes }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PairwayError::NotReady),
            Err(e) => Err(e.into()),
        }
    }

    /// Recursively remove all backing storage for the scope.
    ///
    /// Idempotent: a second call, or a call on a scope that was never
    /// populated, is a no-op. Safe from any phase.
    pub async fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            debug!(scope = %self.scope_id, "Scope already destroyed");
            return Ok(());
        }
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {
                info!(scope = %self.scope_id, "Session scope destroyed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(scope = %self.scope_id, error = %e, "Failed to remove session scope");
                Err(e.into())
            }
        }
    }

    /// Whether `destroy` has run for this handle.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, EphemeralStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = EphemeralStore::new(tmp.path());
        (tmp, store)
    }

    #[tokio::test]
    async fn test_open_purges_prior_state() {
        let (_tmp, store) = store();
        let scope = store.open("15551234567").await.unwrap();
        scope.write_credentials(b"{\"old\":true}").await.unwrap();

        let scope = store.open("15551234567").await.unwrap();
        assert!(matches!(
            scope.read_credential_snapshot().await,
            Err(PairwayError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_read_before_write_is_not_ready() {
        let (_tmp, store) = store();
        let scope = store.open("447911123456").await.unwrap();
        assert!(matches!(
            scope.read_credential_snapshot().await,
            Err(PairwayError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let (_tmp, store) = store();
        let scope = store.open("447911123456").await.unwrap();
        scope.write_credentials(b"{\"noiseKey\":\"...\"}").await.unwrap();
        let snap = scope.read_credential_snapshot().await.unwrap();
        assert_eq!(snap.as_bytes(), b"{\"noiseKey\":\"...\"}");
    }

    #[tokio::test]
    async fn test_empty_blob_is_not_ready() {
        let (_tmp, store) = store();
        let scope = store.open("84987654321").await.unwrap();
        scope.write_credentials(b"").await.unwrap();
        assert!(matches!(
            scope.read_credential_snapshot().await,
            Err(PairwayError::NotReady)
        ));
    }

    #[tokio::test]
    async fn test_destroy_removes_directory() {
        let (_tmp, store) = store();
        let scope = store.open("15551234567").await.unwrap();
        scope.write_credentials(b"secret").await.unwrap();
        scope.destroy().await.unwrap();
        assert!(!scope.dir().exists());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (_tmp, store) = store();
        let scope = store.open("15551234567").await.unwrap();
        scope.destroy().await.unwrap();
        scope.destroy().await.unwrap();
        assert!(scope.is_destroyed());
    }

    #[tokio::test]
    async fn test_destroy_never_populated_scope_is_noop() {
        let (_tmp, store) = store();
        let scope = store.open("15551234567").await.unwrap();
        // Simulate an external sweep of the directory
        tokio::fs::remove_dir_all(scope.dir()).await.unwrap();
        scope.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_write_after_destroy_is_refused() {
        let (_tmp, store) = store();
        let scope = store.open("15551234567").await.unwrap();
        scope.destroy().await.unwrap();
        assert!(scope.write_credentials(b"late").await.is_err());
        assert!(!scope.dir().exists());
    }
}
