//! Error types for adaptiq
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in adaptiq
#[derive(Debug, Error)]
pub enum QuizError {
    /// Record not found in storage
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid argument (e.g. an assignment date too far ahead)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// AI provider error
    #[error("AI error: {0}")]
    Ai(#[from] crate::ai::AiError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl QuizError {
    /// Wrap a poisoned lock into a storage error.
    pub fn poisoned<T>(err: std::sync::PoisonError<T>) -> Self {
        QuizError::Storage(format!("lock poisoned: {}", err))
    }
}

/// Result type alias for adaptiq operations
pub type Result<T> = std::result::Result<T, QuizError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = QuizError::NotFound("user 7".to_string());
        assert_eq!(err.to_string(), "Not found: user 7");
    }

    #[test]
    fn test_validation_error() {
        let err = QuizError::Validation("date 2031-01-01 is beyond the assignment horizon".to_string());
        assert_eq!(
            err.to_string(),
            "Validation failed: date 2031-01-01 is beyond the assignment horizon"
        );
    }

    #[test]
    fn test_storage_error() {
        let err = QuizError::Storage("database locked".to_string());
        assert_eq!(err.to_string(), "Storage error: database locked");
    }

    #[test]
    fn test_config_error() {
        let err = QuizError::Config("max_ai_concurrent must be > 0".to_string());
        assert_eq!(err.to_string(), "Config error: max_ai_concurrent must be > 0");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QuizError = io_err.into();
        assert!(matches!(err, QuizError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: QuizError = json_err.into();
        assert!(matches!(err, QuizError::Json(_)));
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let err: QuizError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, QuizError::Sqlite(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(QuizError::Validation("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }
}
