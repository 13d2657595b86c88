//! Errors from the question generation provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the worker should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// Try again on the next cycle
    Retryable,
    /// Exclude the combo until configuration changes
    Config,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Retryable => "retryable",
            ErrorClass::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Unsupported combination: {language}/{level}")]
    UnsupportedCombo { language: String, level: String },

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl AiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AiError::RateLimited { .. } | AiError::Network(_) | AiError::Timeout(_) | AiError::Malformed(_) => {
                ErrorClass::Retryable
            }
            AiError::Api { status, .. } => match status {
                400 | 401 | 403 | 404 | 422 => ErrorClass::Config,
                _ => ErrorClass::Retryable,
            },
            AiError::UnsupportedCombo { .. } | AiError::MissingApiKey { .. } => ErrorClass::Config,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, AiError::RateLimited { .. })
    }
}
