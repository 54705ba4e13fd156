//! Application error types.
//!
//! Every failure surfaced to a caller is one of these variants. Callers only
//! ever see the rendered message; `kind()` exists for structured logging.

use thiserror::Error;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Unified error type for the diagnostics service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or unknown request parameters. Raised before any I/O.
    #[error("{0}")]
    Validation(String),

    /// Caller-supplied SQL rejected by the read-only validator.
    #[error("Query validation failed: {0}")]
    UnsafeSql(String),

    /// Secret or connection-parameter resolution failed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database unreachable or authentication failed.
    #[error("Failed to connect to the database: {0}")]
    DatabaseConnection(String),

    /// A statement failed on an open connection.
    #[error("Query failed: {0}")]
    DatabaseQuery(String),

    /// The request exceeded its time budget.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Anything not covered above.
    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl AppError {
    /// Short machine-friendly category, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) | AppError::UnsafeSql(_) => "validation",
            AppError::Configuration(_) => "configuration",
            AppError::DatabaseConnection(_) => "connection",
            AppError::DatabaseQuery(_) => "query",
            AppError::Timeout(_) => "timeout",
            AppError::Internal(_) => "unexpected",
        }
    }

    /// Whether the error was raised before any external call was made.
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_) | AppError::UnsafeSql(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = AppError::Validation("Unknown environment 'qa'".into());
        assert_eq!(err.to_string(), "Unknown environment 'qa'");
        assert!(err.is_validation());
    }

    #[test]
    fn test_kind_per_variant() {
        assert_eq!(AppError::Configuration("x".into()).kind(), "configuration");
        assert_eq!(AppError::DatabaseConnection("x".into()).kind(), "connection");
        assert_eq!(AppError::Timeout(5).kind(), "timeout");
        assert!(!AppError::DatabaseQuery("x".into()).is_validation());
    }
}
