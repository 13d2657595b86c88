//! Learner-side records read by the scorer and selector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::question::{Combo, QuestionType};

pub const DEFAULT_FRESH_QUESTION_RATIO: f64 = 0.3;
pub const DEFAULT_KNOWN_QUESTION_PENALTY: f64 = 0.1;
pub const DEFAULT_REVIEW_INTERVAL_DAYS: i64 = 7;
pub const DEFAULT_WEAK_AREA_BOOST: f64 = 2.0;
pub const DEFAULT_DAILY_GOAL: u32 = 10;

pub const MIN_WEAK_AREA_BOOST: f64 = 0.1;
pub const MAX_WEAK_AREA_BOOST: f64 = 10.0;
pub const MAX_DAILY_GOAL: u32 = 100;
pub const MAX_REVIEW_INTERVAL_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub preferred_language: String,
    pub current_level: String,
    /// Offset from UTC of the user's local calendar
    pub utc_offset_minutes: i32,
    /// Question types the user practices; empty means all
    pub question_types: Vec<QuestionType>,
    pub ai_enabled: bool,
}

impl User {
    pub fn new(id: i64, username: impl Into<String>, language: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            preferred_language: language.into(),
            current_level: level.into(),
            utc_offset_minutes: 0,
            question_types: Vec::new(),
            ai_enabled: true,
        }
    }

    pub fn wants(&self, question_type: QuestionType) -> bool {
        self.question_types.is_empty() || self.question_types.contains(&question_type)
    }

    /// Question types this user practices, expanded.
    pub fn effective_types(&self) -> Vec<QuestionType> {
        if self.question_types.is_empty() {
            QuestionType::ALL.to_vec()
        } else {
            self.question_types.clone()
        }
    }

    pub fn combos(&self) -> Vec<Combo> {
        self.effective_types()
            .into_iter()
            .map(|qt| Combo::new(self.preferred_language.clone(), self.current_level.clone(), qt))
            .collect()
    }
}

/// Per-user tuning knobs for scoring and daily selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserLearningPreferences {
    pub focus_on_weak_areas: bool,
    pub fresh_question_ratio: f64,
    pub known_question_penalty: f64,
    pub review_interval_days: i64,
    pub weak_area_boost: f64,
    pub daily_goal: u32,
}

impl Default for UserLearningPreferences {
    fn default() -> Self {
        Self {
            focus_on_weak_areas: true,
            fresh_question_ratio: DEFAULT_FRESH_QUESTION_RATIO,
            known_question_penalty: DEFAULT_KNOWN_QUESTION_PENALTY,
            review_interval_days: DEFAULT_REVIEW_INTERVAL_DAYS,
            weak_area_boost: DEFAULT_WEAK_AREA_BOOST,
            daily_goal: DEFAULT_DAILY_GOAL,
        }
    }
}

fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() { value.clamp(min, max) } else { fallback }
}

impl UserLearningPreferences {
    /// Force every field into its declared range. Non-finite values fall back to defaults.
    pub fn clamped(&self) -> Self {
        Self {
            focus_on_weak_areas: self.focus_on_weak_areas,
            fresh_question_ratio: clamp_or(self.fresh_question_ratio, 0.0, 1.0, DEFAULT_FRESH_QUESTION_RATIO),
            known_question_penalty: clamp_or(self.known_question_penalty, 0.0, 1.0, DEFAULT_KNOWN_QUESTION_PENALTY),
            review_interval_days: self.review_interval_days.clamp(1, MAX_REVIEW_INTERVAL_DAYS),
            weak_area_boost: clamp_or(
                self.weak_area_boost,
                MIN_WEAK_AREA_BOOST,
                MAX_WEAK_AREA_BOOST,
                DEFAULT_WEAK_AREA_BOOST,
            ),
            daily_goal: self.daily_goal.clamp(1, MAX_DAILY_GOAL),
        }
    }

    /// Split the daily goal into (fresh, review) targets.
    pub fn partition(&self) -> (usize, usize) {
        let prefs = self.clamped();
        let total = prefs.daily_goal as usize;
        let fresh = ((total as f64) * prefs.fresh_question_ratio).round() as usize;
        let fresh = fresh.min(total);
        (fresh, total - fresh)
    }
}

/// Per (user, question) interaction metadata, owned by the answer flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserQuestionMetadata {
    pub marked_as_known: bool,
    /// 1-5, None until the learner rates it
    pub confidence_level: Option<i64>,
}

/// Topic rollup consumed by the weak-area boost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerformanceMetrics {
    pub user_id: i64,
    pub topic: String,
    pub language: String,
    pub level: String,
    pub total_attempts: i64,
    pub correct_attempts: i64,
    pub average_response_time_ms: f64,
    pub last_updated: DateTime<Utc>,
}

impl PerformanceMetrics {
    /// Accuracy as a percentage; 0 when nothing has been attempted.
    pub fn accuracy_rate(&self) -> f64 {
        if self.total_attempts <= 0 {
            return 0.0;
        }
        self.correct_attempts as f64 / self.total_attempts as f64 * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserResponse {
    pub user_id: i64,
    pub question_id: i64,
    pub is_correct: bool,
    pub response_time_ms: i64,
    pub created_at: DateTime<Utc>,
}
