//! Daily assignment rows and hint records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::question::{Combo, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyQuestionAssignment {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    pub assignment_date: NaiveDate,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyProgress {
    pub date: NaiveDate,
    pub completed: usize,
    pub total: usize,
}

impl DailyProgress {
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

/// One day a question was assigned, with how the user did on it that day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionHistoryEntry {
    pub assignment_date: NaiveDate,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last answer given on that local day; None when unanswered
    pub is_correct: Option<bool>,
}

/// Short-lived "this combo is starving" signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationHint {
    pub id: i64,
    pub user_id: i64,
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub priority_weight: i64,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl GenerationHint {
    pub fn combo(&self) -> Combo {
        Combo::new(self.language.clone(), self.level.clone(), self.question_type)
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}
