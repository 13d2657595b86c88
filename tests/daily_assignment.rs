//! End-to-end daily selection and scoring against a file-backed store.

use std::collections::HashSet;
use std::sync::Arc;

use adaptiq::QuizError;
use adaptiq::config::{DailyConfig, ScoringConfig};
use adaptiq::daily::DailySelector;
use adaptiq::domain::{
    Combo, NewQuestion, Question, QuestionContent, QuestionType, User, UserLearningPreferences, UserResponse,
};
use adaptiq::scoring::PriorityScorer;
use adaptiq::store::QuizStore;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

fn noon(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
}

fn setup() -> (TempDir, Arc<QuizStore>) {
    let dir = TempDir::new().unwrap();
    let store = QuizStore::open_at(&dir.path().join("adaptiq.db")).unwrap();
    store.upsert_user(&User::new(1, "ada", "italian", "A1")).unwrap();
    (dir, Arc::new(store))
}

fn seed_questions(store: &QuizStore, count: usize, start: DateTime<Utc>) -> Vec<Question> {
    (0..count)
        .map(|i| {
            let content = QuestionContent {
                question: format!("Domanda {}", i),
                options: vec!["uno".into(), "due".into(), "tre".into(), "quattro".into()],
                correct_answer: 0,
                explanation: None,
                passage: None,
                topic: Some("numbers".to_string()),
            };
            let new = NewQuestion::new(Combo::new("italian", "A1", QuestionType::Vocabulary), 0.0, content);
            store
                .insert_question(&new, start + Duration::seconds(i as i64))
                .unwrap()
        })
        .collect()
}

fn answer(store: &QuizStore, question_id: i64, is_correct: bool, at: DateTime<Utc>) {
    store
        .record_response(&UserResponse {
            user_id: 1,
            question_id,
            is_correct,
            response_time_ms: 4_000,
            created_at: at,
        })
        .unwrap();
}

fn selector(store: &Arc<QuizStore>) -> DailySelector {
    DailySelector::new(Arc::clone(store), DailyConfig::default())
}

fn question_ids(rows: &[adaptiq::domain::DailyQuestionAssignment]) -> HashSet<i64> {
    rows.iter().map(|r| r.question_id).collect()
}

#[test]
fn test_two_days_fresh_then_review() {
    let (_dir, store) = setup();
    seed_questions(&store, 12, noon(1));
    let selector = selector(&store);

    let day1 = selector.assign_for_date_at(1, date(10), noon(10)).unwrap();
    assert_eq!(day1.len(), 10);

    for row in &day1 {
        answer(&store, row.question_id, false, noon(10));
        selector.mark_completed(1, row.question_id, date(10)).unwrap();
    }
    assert!(selector.daily_progress(1, date(10)).unwrap().is_done());

    // only 2 never-assigned questions left: 2 fresh + 8 review
    let day2 = selector.assign_for_date_at(1, date(11), noon(11)).unwrap();
    assert_eq!(day2.len(), 10);
    let fresh: HashSet<i64> = question_ids(&day2).difference(&question_ids(&day1)).copied().collect();
    assert_eq!(fresh.len(), 2);

    assert_eq!(selector.available_dates(1).unwrap(), vec![date(11), date(10)]);
}

#[test]
fn test_assignment_is_idempotent() {
    let (_dir, store) = setup();
    seed_questions(&store, 15, noon(1));
    let selector = selector(&store);

    let first = selector.assign_for_date_at(1, date(10), noon(10)).unwrap();
    seed_questions(&store, 5, noon(10));
    let second = selector.assign_for_date_at(1, date(10), noon(10) + Duration::hours(2)).unwrap();

    assert_eq!(question_ids(&first), question_ids(&second));
    assert_eq!(selector.daily_progress(1, date(10)).unwrap().total, 10);
}

#[test]
fn test_concurrent_assignment_creates_one_set() {
    let (_dir, store) = setup();
    seed_questions(&store, 30, noon(1));

    let results: Vec<HashSet<i64>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    let rows = selector(&store).assign_for_date_at(1, date(10), noon(10)).unwrap();
                    question_ids(&rows)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for ids in &results {
        assert_eq!(ids, &results[0]);
    }
    assert_eq!(store.assignments_for(1, date(10)).unwrap().len(), 10);
}

#[test]
fn test_past_dates_are_read_only_and_far_future_rejected() {
    let (_dir, store) = setup();
    seed_questions(&store, 12, noon(1));
    let selector = selector(&store);

    let past = selector.assign_for_date_at(1, date(5), noon(10)).unwrap();
    assert!(past.is_empty());
    assert!(store.assignments_for(1, date(5)).unwrap().is_empty());

    // default horizon allows tomorrow
    assert_eq!(selector.assign_for_date_at(1, date(11), noon(10)).unwrap().len(), 10);

    let err = selector.assign_for_date_at(1, date(20), noon(10)).unwrap_err();
    assert!(matches!(err, QuizError::Validation(_)));
}

#[test]
fn test_insufficient_inventory_reports_shortfall() {
    let (_dir, store) = setup();
    seed_questions(&store, 4, noon(1));
    let selector = selector(&store);

    let rows = selector.assign_for_date_at(1, date(10), noon(10)).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(selector.shortfall_for(1, date(10)).unwrap(), 6);
}

#[test]
fn test_unknown_user_is_not_found() {
    let (_dir, store) = setup();
    let err = selector(&store).assign_for_date_at(42, date(10), noon(10)).unwrap_err();
    assert!(matches!(err, QuizError::NotFound(_)));
}

#[test]
fn test_recently_correct_question_scores_lower_and_drops_from_review() {
    let (_dir, store) = setup();
    let questions = seed_questions(&store, 2, noon(1));
    let scorer = PriorityScorer::new(Arc::clone(&store), &ScoringConfig::default());
    let target = questions[0].id;

    answer(&store, target, true, noon(10));
    let today = scorer.recalculate_question_at(1, target, noon(10)).unwrap();
    let later = scorer.recalculate_question_at(1, target, noon(18)).unwrap();
    assert!(today < later);

    let updated = scorer.recalculate_at(1, noon(10)).unwrap();
    assert_eq!(updated, 2);
    let scores = store.scores_for_user(1).unwrap();
    assert!(scores[&target] < scores[&questions[1].id]);
}

#[test]
fn test_extreme_stored_preferences_still_assign() {
    let (_dir, store) = setup();
    seed_questions(&store, 12, noon(1));
    let saved = store
        .save_preferences(
            1,
            &UserLearningPreferences {
                review_interval_days: i64::MAX / 2,
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(saved.review_interval_days, 365);

    let rows = selector(&store).assign_for_date_at(1, date(5), noon(5)).unwrap();
    assert_eq!(rows.len(), 10);
}

#[test]
fn test_huge_horizon_does_not_overflow() {
    let (_dir, store) = setup();
    seed_questions(&store, 3, noon(1));
    let selector = DailySelector::new(
        Arc::clone(&store),
        DailyConfig {
            horizon_days: i64::MAX,
            ..DailyConfig::default()
        },
    );
    let far = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap();
    assert_eq!(selector.assign_for_date_at(1, far, noon(10)).unwrap().len(), 3);
}

#[test]
fn test_question_history_over_recent_days() {
    let (_dir, store) = setup();
    let question = seed_questions(&store, 1, noon(1)).remove(0);
    let selector = selector(&store);

    assert_eq!(selector.assign_for_date_at(1, date(10), noon(10)).unwrap().len(), 1);
    answer(&store, question.id, false, noon(10));
    selector.mark_completed(1, question.id, date(10)).unwrap();

    // missed yesterday, so it comes back for review
    assert_eq!(selector.assign_for_date_at(1, date(11), noon(11)).unwrap().len(), 1);

    let history = selector.question_history_at(1, question.id, 2, noon(11)).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].assignment_date, date(10));
    assert!(history[0].is_completed);
    assert_eq!(history[0].is_correct, Some(false));
    assert_eq!(history[1].assignment_date, date(11));
    assert!(!history[1].is_completed);
    assert_eq!(history[1].is_correct, None);

    let today_only = selector.question_history_at(1, question.id, 1, noon(11)).unwrap();
    assert_eq!(today_only.len(), 1);
    assert_eq!(today_only[0].assignment_date, date(11));

    let err = selector.question_history_at(1, question.id, 0, noon(11)).unwrap_err();
    assert!(matches!(err, QuizError::Validation(_)));
}
