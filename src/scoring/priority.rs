//! Priority score formula.
//!
//! A question's score for a user starts at a baseline and is multiplied by:
//! - Recency decay (0.0 right after a correct answer, back to 1.0 at the review interval)
//! - Known-question penalty (1 - known_question_penalty when marked as known)
//! - Confidence adjustment (low confidence raises urgency, high confidence lowers it)
//! - Weak-area boost (topic accuracy below the threshold, with at least one attempt)
//!
//! Everything here is pure; "now" is always passed in.

use chrono::{DateTime, Utc};

use crate::domain::{PerformanceMetrics, UserLearningPreferences, UserQuestionMetadata};

/// Score every question starts from.
pub const BASELINE_SCORE: f64 = 100.0;

/// Topic accuracy (percent) under which the weak-area boost applies.
pub const DEFAULT_WEAK_AREA_THRESHOLD: f64 = 60.0;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Inputs for scoring one (user, question) pair.
#[derive(Debug, Clone, Default)]
pub struct ScoreInput<'a> {
    pub metadata: Option<&'a UserQuestionMetadata>,
    /// Most recent correct answer by this user to this question
    pub last_correct_at: Option<DateTime<Utc>>,
    /// Rollup for the question's topic, if the question has one
    pub topic_metrics: Option<&'a PerformanceMetrics>,
}

/// Linear recency factor in [0, 1].
///
/// Returns 1.0 when there is no correct answer or it is older than the interval.
/// An answer timestamped in the future counts as just answered.
pub fn recency_decay(last_correct_at: Option<DateTime<Utc>>, interval_days: i64, now: DateTime<Utc>) -> f64 {
    let Some(answered) = last_correct_at else {
        return 1.0;
    };
    let interval_ms = interval_days.max(1) as f64 * MILLIS_PER_DAY;
    let elapsed_ms = (now - answered).num_milliseconds().max(0) as f64;
    if elapsed_ms >= interval_ms {
        1.0
    } else {
        elapsed_ms / interval_ms
    }
}

/// Multiplier for a 1-5 confidence rating. Out-of-range ratings are neutral.
pub fn confidence_multiplier(level: Option<i64>) -> f64 {
    match level {
        None => 1.0,
        Some(1) => 1.4,
        Some(2) => 1.2,
        Some(3) => 1.0,
        Some(4) => 0.8,
        Some(5) => 0.6,
        Some(other) => {
            tracing::warn!(confidence_level = other, "Confidence level out of range, treating as neutral");
            1.0
        }
    }
}

/// Clamp a raw score to a finite non-negative value.
pub fn clamp_score(raw: f64) -> f64 {
    if !raw.is_finite() || raw < 0.0 {
        tracing::warn!(raw_score = %raw, "Invalid priority score, clamping to 0");
        return 0.0;
    }
    raw
}

/// Whether the weak-area boost applies for this topic rollup.
pub fn is_weak_area(metrics: Option<&PerformanceMetrics>, threshold: f64) -> bool {
    match metrics {
        Some(m) if m.total_attempts > 0 => m.accuracy_rate() < threshold,
        _ => false,
    }
}

/// Score one pair. Preferences are re-clamped here; stored values are never trusted.
pub fn score(input: &ScoreInput<'_>, prefs: &UserLearningPreferences, weak_threshold: f64, now: DateTime<Utc>) -> f64 {
    let prefs = prefs.clamped();
    let mut value = BASELINE_SCORE;

    value *= recency_decay(input.last_correct_at, prefs.review_interval_days, now);

    if let Some(meta) = input.metadata {
        if meta.marked_as_known {
            value *= 1.0 - prefs.known_question_penalty;
        }
        value *= confidence_multiplier(meta.confidence_level);
    }

    if prefs.focus_on_weak_areas && is_weak_area(input.topic_metrics, weak_threshold) {
        value *= prefs.weak_area_boost;
    }

    clamp_score(value)
}
