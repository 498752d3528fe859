//! Unified error types for the ELYX ecosystem.
//!
//! Provides a common error type [`ElyxError`] that can represent errors from
//! any part of the system. Domain-specific error types convert to `ElyxError`
//! for uniform handling at API boundaries.

use thiserror::Error;

/// Unified error type for all ELYX operations.
#[derive(Error, Debug)]
pub enum ElyxError {
    /// I/O errors (file access etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Solver/algorithm errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Wire-protocol decode errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using ElyxError.
pub type ElyxResult<T> = Result<T, ElyxError>;

impl From<anyhow::Error> for ElyxError {
    fn from(err: anyhow::Error) -> Self {
        ElyxError::Other(err.to_string())
    }
}

impl From<String> for ElyxError {
    fn from(s: String) -> Self {
        ElyxError::Other(s)
    }
}

impl From<&str> for ElyxError {
    fn from(s: &str) -> Self {
        ElyxError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for ElyxError {
    fn from(err: serde_json::Error) -> Self {
        ElyxError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ElyxError::Protocol("unknown message kind".into());
        assert!(err.to_string().contains("Protocol error"));
        assert!(err.to_string().contains("unknown message kind"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ElyxError = io_err.into();
        assert!(matches!(err, ElyxError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> ElyxResult<()> {
            Err(ElyxError::Validation("test".into()))
        }

        fn outer() -> ElyxResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
