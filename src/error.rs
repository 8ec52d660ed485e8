//! Error types for request governance

use std::time::Duration;
use thiserror::Error;

/// Result type alias for governance setup and configuration
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Errors raised while building or configuring governance components
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A component was constructed with parameters that break its invariants
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GovernanceError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        GovernanceError::InvalidConfig {
            message: message.into(),
        }
    }
}

/// How the retrier treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The remote side asked us to slow down
    RateLimited,
    /// Server-class failure, retryable until the budget runs out
    Server,
    /// Caller mistake, never retried
    Client,
    /// Connection or timeout failure, retryable and swallowed when exhausted
    Transport,
}

/// Classified failure of a single fetch operation
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    /// Remote service signalled rate limiting (HTTP 429)
    #[error("Rate limited by remote service")]
    RateLimited,

    /// Server error (HTTP 5xx)
    #[error("Server error {status}")]
    Server { status: u16 },

    /// Client error (HTTP 4xx other than 429)
    #[error("Client error {status}: {reason}")]
    Client { status: u16, reason: String },

    /// Connection-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The attempt did not finish in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Classify an HTTP status code. Returns `None` for non-error statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(FetchError::RateLimited),
            500..=599 => Some(FetchError::Server { status }),
            400..=499 => Some(FetchError::Client {
                status,
                reason: canonical_reason(status).to_string(),
            }),
            _ => None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        FetchError::Transport(message.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited => FailureKind::RateLimited,
            FetchError::Server { .. } => FailureKind::Server,
            FetchError::Client { .. } => FailureKind::Client,
            FetchError::Transport(_) | FetchError::Timeout(_) => FailureKind::Transport,
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), FailureKind::Client)
    }
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        422 => "Unprocessable Entity",
        _ => "Client Error",
    }
}
