//! Configuration for Pairway
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Pairway - pairing-code gateway for messaging account linking
#[derive(Parser, Debug, Clone)]
#[command(name = "pairway")]
#[command(about = "Pairing-code gateway linking phone numbers to messaging accounts")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Messenger engine WebSocket URL
    #[arg(long, env = "ENGINE_URL", default_value = "ws://localhost:8799")]
    pub engine_url: String,

    /// Timeout for engine requests (pairing code, notices) in milliseconds
    #[arg(long, env = "ENGINE_TIMEOUT_MS", default_value = "60000")]
    pub engine_timeout_ms: u64,

    /// Root directory for ephemeral session scopes
    #[arg(long, env = "SESSION_ROOT", default_value = "./sessions")]
    pub session_root: PathBuf,

    /// Grace interval between link-up and the credential snapshot read, in seconds
    #[arg(long, env = "GRACE_SECS", default_value = "5")]
    pub grace_secs: u64,

    /// Credential store repository in owner/repo form
    #[arg(long, env = "STORE_REPO")]
    pub store_repo: Option<String>,

    /// Branch to commit credential snapshots to
    #[arg(long, env = "STORE_BRANCH", default_value = "main")]
    pub store_branch: String,

    /// Key namespace (path prefix) for credential snapshots inside the repository
    #[arg(long, env = "STORE_NAMESPACE", default_value = "sessions")]
    pub store_namespace: String,

    /// API token for the credential store. Environment only; no flag default.
    #[arg(long, env = "STORE_TOKEN", hide_env_values = true)]
    pub store_token: Option<String>,

    /// Base URL of the credential store API
    #[arg(long, env = "STORE_API_BASE", default_value = "https://api.github.com")]
    pub store_api_base: String,

    /// Log level for the pairway crate (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration consistency at startup.
    pub fn validate(&self) -> Result<(), String> {
        match self.store_repo {
            None => return Err("STORE_REPO is required (owner/repo)".to_string()),
            Some(ref repo) => {
                let mut parts = repo.splitn(2, '/');
                let owner = parts.next().unwrap_or("");
                let name = parts.next().unwrap_or("");
                if owner.is_empty() || name.is_empty() {
                    return Err(format!("STORE_REPO must be owner/repo, got '{}'", repo));
                }
            }
        }

        if self.store_token.as_deref().map_or(true, str::is_empty) {
            return Err("STORE_TOKEN is required".to_string());
        }

        if self.grace_secs == 0 {
            return Err("GRACE_SECS must be at least 1".to_string());
        }

        Ok(())
    }
}
