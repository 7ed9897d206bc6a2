//! Common error types for Orchard

use thiserror::Error;

/// Common result type for Orchard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across Orchard workers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input to a capability call — never retried
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Declared-but-unimplemented variant (e.g. a future content format)
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Expired or revoked platform credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Platform API returned 429
    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Platform API error with an HTTP status
    #[error("Platform API error {status}: {message}")]
    Platform { status: u16, message: String },

    /// Operation exceeded its per-attempt timeout
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is transient and eligible for retry with backoff.
    ///
    /// Validation, unsupported-variant and authorization errors are never
    /// retried here — authorization gets exactly one refresh-and-retry at the
    /// collector layer instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited { .. } | Error::Timeout(_) => true,
            Error::Platform { status, .. } => *status >= 500,
            Error::Database(e) => e.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::RateLimited { retry_after_secs: None }.is_retryable());
        assert!(Error::Timeout(500).is_retryable());
        assert!(Error::Platform { status: 503, message: "unavailable".into() }.is_retryable());
        assert!(!Error::Platform { status: 400, message: "bad request".into() }.is_retryable());
        assert!(!Error::Unauthorized("token expired".into()).is_retryable());
        assert!(!Error::InvalidInput("missing post id".into()).is_retryable());
        assert!(!Error::Unsupported("image_post".into()).is_retryable());
    }
}
