//! Credential archival
//!
//! Durably copies a captured credential snapshot to a Git-hosting contents
//! API, keyed per session so concurrent archives never contend on the same
//! path. Writes are last-writer-wins: each attempt synchronizes on the
//! remote's current blob sha before the PUT, and a stale-sha conflict just
//! refreshes and retries within a small bounded budget. The controller
//! enforces at-most-once invocation per session; this layer only has to be
//! safe under network-level replays.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::store::CredentialSnapshot;
use crate::types::{PairwayError, Result};

/// Total write attempts before giving up.
const MAX_ATTEMPTS: usize = 3;

/// Pause between attempts after a transient failure.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Per-request timeout against the remote API.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Remote store coordinates, resolved once at process start and passed in
/// explicitly. Core logic never reads ambient state for these.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Repository in `owner/repo` form.
    pub repo: String,
    /// Branch the snapshots are committed to.
    pub branch: String,
    /// Path prefix for snapshot keys inside the repository.
    pub namespace: String,
    /// API token.
    pub token: String,
    /// API base URL.
    pub api_base: String,
}

/// The archival seam the session controller depends on.
#[async_trait]
pub trait CredentialArchive: Send + Sync + 'static {
    /// Durably write `snapshot` keyed by `scope_id`. Safe to retry; safe to
    /// be called once per session.
    async fn archive(&self, scope_id: &str, snapshot: &CredentialSnapshot) -> Result<()>;
}

/// How one remote interaction went wrong.
#[derive(Debug)]
enum AttemptError {
    /// Token rejected. Never retried.
    Auth(String),
    /// The remote moved underneath us (stale sha). Resynchronize and retry.
    Conflict,
    /// Network or server trouble. Retried up to the budget.
    Transient(String),
}

/// Low-level remote operations, separated so the retry policy is testable
/// without a network.
#[async_trait]
trait ArchiveTransport: Send + Sync {
    /// Current blob sha for `path` on the target branch, if the file exists.
    async fn fetch_sha(&self, path: &str) -> std::result::Result<Option<String>, AttemptError>;

    /// Commit `body` to `path`.
    async fn put(&self, path: &str, body: &serde_json::Value)
        -> std::result::Result<(), AttemptError>;
}

/// Credential archivist over a Git-hosting contents API.
pub struct Archivist {
    transport: Box<dyn ArchiveTransport>,
    branch: String,
    namespace: String,
}

impl Archivist {
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pairway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PairwayError::Config(format!("archive client: {}", e)))?;
        Ok(Self {
            branch: config.branch.clone(),
            namespace: config.namespace.clone(),
            transport: Box::new(HttpTransport { client, config }),
        })
    }

    #[cfg(test)]
    fn with_transport(transport: Box<dyn ArchiveTransport>, branch: &str, namespace: &str) -> Self {
        Self {
            transport,
            branch: branch.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn blob_path(&self, scope_id: &str) -> String {
        format!("{}/{}/creds.json", self.namespace, scope_id)
    }
}

#[async_trait]
impl CredentialArchive for Archivist {
    async fn archive(&self, scope_id: &str, snapshot: &CredentialSnapshot) -> Result<()> {
        let path = self.blob_path(scope_id);
        let content = BASE64.encode(snapshot.as_bytes());
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=MAX_ATTEMPTS {
            // Synchronize: learn where the remote currently stands.
            let sha = match self.transport.fetch_sha(&path).await {
                Ok(sha) => sha,
                Err(AttemptError::Auth(m)) => return Err(PairwayError::ArchiveAuth(m)),
                Err(AttemptError::Conflict) => {
                    last_error = "remote conflict during sync".to_string();
                    continue;
                }
                Err(AttemptError::Transient(m)) => {
                    warn!(path = %path, attempt, "Archive sync failed: {}", m);
                    last_error = m;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    continue;
                }
            };

            let mut body = json!({
                "message": format!("Update creds.json for {}", scope_id),
                "content": content,
                "branch": self.branch,
            });
            if let Some(ref sha) = sha {
                body["sha"] = json!(sha);
            }

            match self.transport.put(&path, &body).await {
                Ok(()) => {
                    info!(path = %path, attempt, "Credential snapshot archived");
                    return Ok(());
                }
                Err(AttemptError::Auth(m)) => return Err(PairwayError::ArchiveAuth(m)),
                Err(AttemptError::Conflict) => {
                    // Someone advanced the branch between sync and put;
                    // loop around to pick up the new sha.
                    debug!(path = %path, attempt, "Stale sha, resynchronizing");
                    last_error = "non-fast-forward remote state".to_string();
                }
                Err(AttemptError::Transient(m)) => {
                    warn!(path = %path, attempt, "Archive write failed: {}", m);
                    last_error = m;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }

        Err(PairwayError::ArchiveFailed(format!(
            "gave up after {} attempts: {}",
            MAX_ATTEMPTS, last_error
        )))
    }
}

/// reqwest-backed transport for the contents API.
struct HttpTransport {
    client: reqwest::Client,
    config: ArchiveConfig,
}

impl HttpTransport {
    fn content_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.config.api_base, self.config.repo, path
        )
    }

    fn classify(status: StatusCode, body: &str) -> AttemptError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                AttemptError::Auth(format!("{}: {}", status, body))
            }
            // The API answers 404 for a bad token on a private repo too.
            StatusCode::NOT_FOUND => {
                AttemptError::Auth(format!("repository not found or not authorized: {}", body))
            }
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => AttemptError::Conflict,
            _ => AttemptError::Transient(format!("{}: {}", status, body)),
        }
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    async fn fetch_sha(&self, path: &str) -> std::result::Result<Option<String>, AttemptError> {
        let response = self
            .client
            .get(self.content_url(path))
            .query(&[("ref", self.config.branch.as_str())])
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // No prior snapshot at this key; a fresh create.
            return Ok(None);
        }
        if status.is_success() {
            let value: serde_json::Value = response
                .json()
                .await
                .map_err(|e| AttemptError::Transient(e.to_string()))?;
            return Ok(value["sha"].as_str().map(str::to_string));
        }

        let body = response.text().await.unwrap_or_default();
        Err(HttpTransport::classify(status, &body))
    }

    async fn put(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<(), AttemptError> {
        let response = self
            .client
            .put(self.content_url(path))
            .header("Authorization", format!("token {}", self.config.token))
            .header("Accept", "application/vnd.github.v3+json")
            .json(body)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(HttpTransport::classify(status, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot(bytes: &[u8]) -> CredentialSnapshot {
        CredentialSnapshot::from_bytes(bytes.to_vec())
    }

    /// Scripted transport: a queue of canned results per operation.
    struct Scripted {
        fetch_results: Mutex<Vec<std::result::Result<Option<String>, AttemptError>>>,
        put_results: Mutex<Vec<std::result::Result<(), AttemptError>>>,
        fetch_calls: AtomicUsize,
        put_calls: AtomicUsize,
        last_body: Mutex<Option<serde_json::Value>>,
        last_path: Mutex<Option<String>>,
    }

    impl Scripted {
        fn new(
            fetch: Vec<std::result::Result<Option<String>, AttemptError>>,
            put: Vec<std::result::Result<(), AttemptError>>,
        ) -> Self {
            Self {
                fetch_results: Mutex::new(fetch),
                put_results: Mutex::new(put),
                fetch_calls: AtomicUsize::new(0),
                put_calls: AtomicUsize::new(0),
                last_body: Mutex::new(None),
                last_path: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl ArchiveTransport for &'static Scripted {
        async fn fetch_sha(
            &self,
            path: &str,
        ) -> std::result::Result<Option<String>, AttemptError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_path.lock().unwrap() = Some(path.to_string());
            let mut results = self.fetch_results.lock().unwrap();
            if results.is_empty() {
                return Ok(None);
            }
            results.remove(0)
        }

        async fn put(
            &self,
            path: &str,
            body: &serde_json::Value,
        ) -> std::result::Result<(), AttemptError> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_path.lock().unwrap() = Some(path.to_string());
            *self.last_body.lock().unwrap() = Some(body.clone());
            let mut results = self.put_results.lock().unwrap();
            if results.is_empty() {
                return Ok(());
            }
            results.remove(0)
        }
    }

    fn archivist(script: &'static Scripted) -> Archivist {
        Archivist::with_transport(Box::new(script), "main", "sessions")
    }

    fn leak(script: Scripted) -> &'static Scripted {
        Box::leak(Box::new(script))
    }

    #[tokio::test]
    async fn test_fresh_create_omits_sha() {
        let script = leak(Scripted::new(vec![Ok(None)], vec![Ok(())]));
        archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap();

        assert_eq!(script.put_calls.load(Ordering::SeqCst), 1);
        let body = script.last_body.lock().unwrap().clone().unwrap();
        assert!(body.get("sha").is_none());
        assert_eq!(body["branch"], "main");
        assert_eq!(body["content"], BASE64.encode(b"creds"));
        assert_eq!(
            script.last_path.lock().unwrap().as_deref(),
            Some("sessions/15551234567/creds.json")
        );
    }

    #[tokio::test]
    async fn test_overwrite_carries_existing_sha() {
        let script = leak(Scripted::new(
            vec![Ok(Some("abc123".to_string()))],
            vec![Ok(())],
        ));
        archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap();

        let body = script.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["sha"], "abc123");
    }

    #[tokio::test]
    async fn test_conflict_resynchronizes_then_succeeds() {
        let script = leak(Scripted::new(
            vec![Ok(Some("old".to_string())), Ok(Some("new".to_string()))],
            vec![Err(AttemptError::Conflict), Ok(())],
        ));
        archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap();

        assert_eq!(script.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(script.put_calls.load(Ordering::SeqCst), 2);
        let body = script.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["sha"], "new");
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let script = leak(Scripted::new(
            vec![Ok(None)],
            vec![Err(AttemptError::Auth("bad token".to_string()))],
        ));
        let err = archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap_err();

        assert!(matches!(err, PairwayError::ArchiveAuth(_)));
        assert_eq!(script.put_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_during_sync_skips_put() {
        let script = leak(Scripted::new(
            vec![Err(AttemptError::Auth("bad token".to_string()))],
            vec![],
        ));
        let err = archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap_err();

        assert!(matches!(err, PairwayError::ArchiveAuth(_)));
        assert_eq!(script.put_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_budget() {
        let script = leak(Scripted::new(
            vec![Ok(None), Ok(None), Ok(None)],
            vec![
                Err(AttemptError::Transient("502".to_string())),
                Err(AttemptError::Transient("timeout".to_string())),
                Err(AttemptError::Transient("502".to_string())),
            ],
        ));
        let err = archivist(script)
            .archive("15551234567", &snapshot(b"creds"))
            .await
            .unwrap_err();

        assert!(matches!(err, PairwayError::ArchiveFailed(_)));
        assert_eq!(script.put_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            HttpTransport::classify(StatusCode::UNAUTHORIZED, ""),
            AttemptError::Auth(_)
        ));
        assert!(matches!(
            HttpTransport::classify(StatusCode::NOT_FOUND, ""),
            AttemptError::Auth(_)
        ));
        assert!(matches!(
            HttpTransport::classify(StatusCode::CONFLICT, ""),
            AttemptError::Conflict
        ));
        assert!(matches!(
            HttpTransport::classify(StatusCode::UNPROCESSABLE_ENTITY, ""),
            AttemptError::Conflict
        ));
        assert!(matches!(
            HttpTransport::classify(StatusCode::BAD_GATEWAY, ""),
            AttemptError::Transient(_)
        ));
    }
}
