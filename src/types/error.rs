//! Error types for Pairway

use hyper::StatusCode;

/// Main error type for Pairway operations
#[derive(Debug, thiserror::Error)]
pub enum PairwayError {
    /// The caller-supplied phone number failed validation. Carries the
    /// user-facing message returned with the HTTP 400.
    #[error("{0}")]
    InvalidNumber(String),

    /// The engine could not issue a pairing code (unreachable remote,
    /// request timeout, account state).
    #[error("Pairing code error: {0}")]
    PairingCode(String),

    /// No credential material has been written into the session scope yet.
    #[error("Credential snapshot not ready")]
    NotReady,

    /// Messenger engine / socket provider failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The remote closed the connection with the authorization-revoked
    /// status. Terminal for the session; never reconnected.
    #[error("Authorization revoked by remote")]
    AuthRevoked,

    /// The archive remote rejected our token. Non-retryable.
    #[error("Archive authentication failed: {0}")]
    ArchiveAuth(String),

    /// Archival still failing after the retry budget.
    #[error("Archive failed: {0}")]
    ArchiveFailed(String),

    /// Ephemeral store I/O failure.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PairwayError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidNumber(_) => StatusCode::BAD_REQUEST,
            Self::PairingCode(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Provider(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::AuthRevoked => StatusCode::SERVICE_UNAVAILABLE,
            Self::ArchiveAuth(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ArchiveFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for PairwayError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for PairwayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for PairwayError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<reqwest::Error> for PairwayError {
    fn from(err: reqwest::Error) -> Self {
        Self::ArchiveFailed(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PairwayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Provider(err.to_string())
    }
}

/// Result type alias for Pairway operations
pub type Result<T> = std::result::Result<T, PairwayError>;
