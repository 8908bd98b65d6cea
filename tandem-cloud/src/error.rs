//! Cloud error types.

use thiserror::Error;

/// Result type for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Errors that can occur when talking to the remote account store or the
/// callable functions.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("API request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("function {function} failed ({status}): {message}")]
    Function {
        function: String,
        status: String,
        message: String,
    },

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    /// Returns true if this error represents a 429 rate-limit response.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            CloudError::RateLimited { .. } => true,
            CloudError::Status { status, .. } => *status == 429,
            CloudError::Http(e) => e.status().is_some_and(|s| s.as_u16() == 429),
            _ => false,
        }
    }

    /// Returns the retry-after duration if this is a rate-limit error.
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            CloudError::RateLimited { retry_after_secs } => {
                Some(std::time::Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }

    /// Returns true if the failure says nothing about the remote data and the
    /// call may succeed later: transport failures, timeouts, 5xx, 429, and
    /// functions reporting `UNAVAILABLE`/`INTERNAL`/`DEADLINE_EXCEEDED`.
    pub fn is_transient(&self) -> bool {
        match self {
            CloudError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CloudError::Status { status, .. } => *status >= 500 || *status == 429,
            CloudError::Function { status, .. } => matches!(
                status.as_str(),
                "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED" | "RESOURCE_EXHAUSTED"
            ),
            CloudError::RateLimited { .. } | CloudError::Timeout | CloudError::Network(_) => true,
            _ => false,
        }
    }
}
