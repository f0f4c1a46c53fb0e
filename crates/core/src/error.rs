//! Error types for the parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Backend failures live in their own enum so the controller can tell a
//! user-requested cancellation apart from a transport or server failure.

use thiserror::Error;

/// The top-level error type for all parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Backend errors ---
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by a backend client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    /// The in-flight request was cancelled through `interrupt()`.
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend request failed: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// A second completion was issued while one was still outstanding.
    #[error("Backend is busy with another completion")]
    Busy,

    #[error("Backend not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_displays_correctly() {
        let err = Error::Backend(BackendError::Api {
            status_code: 503,
            message: "loading model".into(),
        });
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("loading model"));
    }

    #[test]
    fn only_cancelled_is_cancellation() {
        assert!(BackendError::Cancelled.is_cancelled());
        assert!(!BackendError::Unavailable("connection refused".into()).is_cancelled());
        assert!(!BackendError::Busy.is_cancelled());
    }
}
