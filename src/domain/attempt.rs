//! Persisted record of one generation attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::question::{Combo, QuestionType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Completed,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Completed => "completed",
            AttemptOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(AttemptOutcome::Completed),
            "failed" => Some(AttemptOutcome::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub id: i64,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    /// "system" or "user:<id>"
    pub subject: String,
    pub outcome: AttemptOutcome,
    /// "retryable" or "config" for failures
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub question_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn combo(&self) -> Combo {
        Combo::new(self.language.clone(), self.level.clone(), self.question_type)
    }
}
