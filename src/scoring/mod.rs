//! Priority scoring for (user, question) pairs.
//!
//! `priority` holds the pure formula; `PriorityScorer` loads the inputs from the
//! store, applies the formula and writes the results back. Recalculation for one
//! user is serialized through a per-user lock, different users run in parallel.

pub mod priority;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::domain::{Question, UserLearningPreferences};
use crate::error::{QuizError, Result};
use crate::store::QuizStore;

pub use priority::{
    BASELINE_SCORE, DEFAULT_WEAK_AREA_THRESHOLD, ScoreInput, clamp_score, confidence_multiplier, is_weak_area, recency_decay,
    score,
};

pub struct PriorityScorer {
    store: Arc<QuizStore>,
    weak_area_threshold: f64,
    user_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl PriorityScorer {
    pub fn new(store: Arc<QuizStore>, config: &ScoringConfig) -> Self {
        Self {
            store,
            weak_area_threshold: config.weak_area_accuracy_threshold,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: i64) -> Result<Arc<Mutex<()>>> {
        let mut locks = self.user_locks.lock().map_err(QuizError::poisoned)?;
        Ok(locks.entry(user_id).or_default().clone())
    }

    /// Run `work` under the user's lock. The map entry is dropped afterwards when
    /// no other caller holds or waits on it, so the map only keeps busy users.
    fn with_user_lock<T>(&self, user_id: i64, work: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.user_lock(user_id)?;
        let result = {
            let _guard = lock.lock().map_err(QuizError::poisoned)?;
            work()
        };
        let mut locks = self.user_locks.lock().map_err(QuizError::poisoned)?;
        // map entry plus `lock` itself
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&user_id);
        }
        result
    }

    /// Stored preferences, or the defaults when the user never saved any.
    pub fn preferences_for(&self, user_id: i64) -> Result<UserLearningPreferences> {
        Ok(self.store.get_preferences(user_id)?.unwrap_or_default().clamped())
    }

    /// Recompute every eligible question's score for a user. Returns rows written.
    pub fn recalculate(&self, user_id: i64) -> Result<usize> {
        self.recalculate_at(user_id, Utc::now())
    }

    pub fn recalculate_at(&self, user_id: i64, now: DateTime<Utc>) -> Result<usize> {
        self.with_user_lock(user_id, || self.recalculate_locked(user_id, now))
    }

    fn recalculate_locked(&self, user_id: i64, now: DateTime<Utc>) -> Result<usize> {
        let user = self.store.require_user(user_id)?;
        let prefs = self.preferences_for(user_id)?;
        let questions = self.store.eligible_questions(&user)?;
        let metadata = self.store.metadata_for_user(user_id)?;
        let last_correct = self.store.last_correct_by_question(user_id)?;
        let performance = self
            .store
            .performance_by_topic(user_id, &user.preferred_language, &user.current_level)?;

        let scores: Vec<(i64, f64)> = questions
            .iter()
            .map(|q| {
                let input = ScoreInput {
                    metadata: metadata.get(&q.id),
                    last_correct_at: last_correct.get(&q.id).copied(),
                    topic_metrics: q.topic.as_ref().and_then(|t| performance.get(t)),
                };
                (q.id, score(&input, &prefs, self.weak_area_threshold, now))
            })
            .collect();

        let updated = self.store.upsert_scores(user_id, &scores, now)?;
        tracing::info!(user_id, updated, "Recalculated priority scores");
        Ok(updated)
    }

    /// Recompute the score of a single pair, e.g. right after the user answered it.
    pub fn recalculate_question(&self, user_id: i64, question_id: i64) -> Result<f64> {
        self.recalculate_question_at(user_id, question_id, Utc::now())
    }

    pub fn recalculate_question_at(&self, user_id: i64, question_id: i64, now: DateTime<Utc>) -> Result<f64> {
        self.with_user_lock(user_id, || self.recalculate_question_locked(user_id, question_id, now))
    }

    fn recalculate_question_locked(&self, user_id: i64, question_id: i64, now: DateTime<Utc>) -> Result<f64> {
        let user = self.store.require_user(user_id)?;
        let question = self
            .store
            .get_question(question_id)?
            .ok_or_else(|| QuizError::NotFound(format!("question {}", question_id)))?;
        let prefs = self.preferences_for(user_id)?;
        let metadata = self.store.metadata_for_user(user_id)?;
        let last_correct = self.store.last_correct_by_question(user_id)?;
        let performance = self
            .store
            .performance_by_topic(user_id, &user.preferred_language, &user.current_level)?;

        let input = ScoreInput {
            metadata: metadata.get(&question_id),
            last_correct_at: last_correct.get(&question_id).copied(),
            topic_metrics: question.topic.as_ref().and_then(|t| performance.get(t)),
        };
        let value = score(&input, &prefs, self.weak_area_threshold, now);
        self.store.upsert_scores(user_id, &[(question_id, value)], now)?;
        Ok(value)
    }

    /// Give a new question its baseline score for every user it is eligible for.
    /// Existing rows are left untouched. Returns rows created.
    pub fn initialize_question(&self, question: &Question) -> Result<usize> {
        let user_ids: Vec<i64> = self
            .store
            .users_for_level(&question.language, &question.level)?
            .into_iter()
            .filter(|u| u.wants(question.question_type))
            .map(|u| u.id)
            .collect();
        if user_ids.is_empty() {
            return Ok(0);
        }
        let created = self
            .store
            .insert_baseline_scores(question.id, &user_ids, BASELINE_SCORE, Utc::now())?;
        tracing::debug!(question_id = question.id, created, "Initialized baseline scores");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QuestionType, User, UserQuestionMetadata, UserResponse};
    use crate::store::test_support::{add_question, add_user};
    use chrono::Duration;

    fn scorer() -> (PriorityScorer, Arc<QuizStore>) {
        let store = Arc::new(QuizStore::open_in_memory().unwrap());
        (PriorityScorer::new(store.clone(), &ScoringConfig::default()), store)
    }

    fn answer(store: &QuizStore, user_id: i64, question_id: i64, correct: bool, at: DateTime<Utc>) {
        store
            .record_response(&UserResponse {
                user_id,
                question_id,
                is_correct: correct,
                response_time_ms: 1500,
                created_at: at,
            })
            .unwrap();
    }

    #[test]
    fn test_recalculate_writes_one_row_per_eligible_question() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        let now = Utc::now();
        let a = add_question(&store, QuestionType::Vocabulary, now);
        let b = add_question(&store, QuestionType::Qa, now);
        store
            .upsert_user(&User::new(2, "other", "german", "C1"))
            .unwrap();

        assert_eq!(scorer.recalculate_at(1, now).unwrap(), 2);
        assert_eq!(scorer.recalculate_at(1, now).unwrap(), 2);
        let scores = store.scores_for_user(1).unwrap();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[&a.id], BASELINE_SCORE);
        assert_eq!(scores[&b.id], BASELINE_SCORE);
        assert_eq!(scorer.recalculate_at(2, now).unwrap(), 0);
    }

    #[test]
    fn test_recalculate_unknown_user() {
        let (scorer, _store) = scorer();
        assert!(matches!(scorer.recalculate(77), Err(QuizError::NotFound(_))));
    }

    #[test]
    fn test_correct_answer_today_scores_below_eight_days_later() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        let answered = Utc::now();
        let q = add_question(&store, QuestionType::Vocabulary, answered - Duration::days(1));
        answer(&store, 1, q.id, true, answered);

        let today = scorer.recalculate_question_at(1, q.id, answered + Duration::hours(1)).unwrap();
        let later = scorer.recalculate_question_at(1, q.id, answered + Duration::days(8)).unwrap();
        assert!(today < later);
    }

    #[test]
    fn test_metadata_and_weak_topic_feed_the_score() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        let now = Utc::now();
        let q = add_question(&store, QuestionType::Vocabulary, now - Duration::days(30));
        // one wrong answer makes "numbers" a weak topic
        answer(&store, 1, q.id, false, now - Duration::days(20));
        store
            .upsert_metadata(
                1,
                q.id,
                &UserQuestionMetadata {
                    marked_as_known: false,
                    confidence_level: Some(1),
                },
            )
            .unwrap();

        let value = scorer.recalculate_question_at(1, q.id, now).unwrap();
        assert!((value - 100.0 * 1.4 * 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_initialize_question_respects_level_and_types() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        let mut picky = User::new(2, "picky", "italian", "A1");
        picky.question_types = vec![QuestionType::Qa];
        store.upsert_user(&picky).unwrap();
        store.upsert_user(&User::new(3, "far", "italian", "C2")).unwrap();

        let q = add_question(&store, QuestionType::Vocabulary, Utc::now());
        assert_eq!(scorer.initialize_question(&q).unwrap(), 1);
        assert_eq!(store.get_score(1, q.id).unwrap(), Some(BASELINE_SCORE));
        assert!(store.get_score(2, q.id).unwrap().is_none());
        assert!(store.get_score(3, q.id).unwrap().is_none());
        assert_eq!(scorer.initialize_question(&q).unwrap(), 0);
    }

    #[test]
    fn test_user_locks_are_per_user() {
        let (scorer, _store) = scorer();
        let a1 = scorer.user_lock(1).unwrap();
        let a2 = scorer.user_lock(1).unwrap();
        let b = scorer.user_lock(2).unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
    }

    #[test]
    fn test_idle_user_locks_are_pruned() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        add_user(&store, 2);
        add_question(&store, QuestionType::Vocabulary, Utc::now());

        scorer.recalculate(1).unwrap();
        scorer.recalculate(2).unwrap();
        assert!(scorer.recalculate(99).is_err());
        assert!(scorer.user_locks.lock().unwrap().is_empty());

        // a held lock survives another caller finishing
        let held = scorer.user_lock(1).unwrap();
        scorer.recalculate(1).unwrap();
        assert_eq!(scorer.user_locks.lock().unwrap().len(), 1);
        drop(held);
    }

    #[test]
    fn test_concurrent_recalculation_same_user() {
        let (scorer, store) = scorer();
        add_user(&store, 1);
        for _ in 0..5 {
            add_question(&store, QuestionType::Vocabulary, Utc::now());
        }
        let scorer = Arc::new(scorer);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scorer = scorer.clone();
                std::thread::spawn(move || scorer.recalculate(1).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }
        assert_eq!(store.scores_for_user(1).unwrap().len(), 5);
    }
}
