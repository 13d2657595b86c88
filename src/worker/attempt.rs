//! Execution of a single admitted generation attempt.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::admission::AdmissionPermit;
use crate::ai::{AiError, ErrorClass, GenerationRequest, QuestionGenerator};
use crate::config::Config;
use crate::domain::{AttemptOutcome, AttemptRecord, NewQuestion, Question};
use crate::error::QuizError;
use crate::scoring::{BASELINE_SCORE, PriorityScorer, is_weak_area};
use crate::store::QuizStore;
use crate::worker::candidates::Candidate;
use crate::worker::state::{AttemptLifecycle, AttemptState};

/// Shared dependencies every attempt task needs.
pub(crate) struct AttemptContext {
    pub store: Arc<QuizStore>,
    pub scorer: Arc<PriorityScorer>,
    pub generator: Arc<dyn QuestionGenerator>,
    pub config: Arc<Config>,
}

#[derive(Debug, Error)]
pub enum AttemptFailure {
    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("storing generated question: {0}")]
    Store(#[from] QuizError),

    #[error("generator panicked: {0}")]
    Panicked(String),
}

impl AttemptFailure {
    pub fn class(&self) -> ErrorClass {
        match self {
            AttemptFailure::Ai(err) => err.class(),
            AttemptFailure::Store(_) | AttemptFailure::Panicked(_) => ErrorClass::Retryable,
        }
    }

    pub fn ai_error(&self) -> Option<&AiError> {
        match self {
            AttemptFailure::Ai(err) => Some(err),
            _ => None,
        }
    }
}

/// Outcome of one attempt, handed back to the cycle.
#[derive(Debug)]
pub struct AttemptReport {
    pub candidate: Candidate,
    pub lifecycle: AttemptLifecycle,
    pub result: Result<Question, AttemptFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

fn step(lifecycle: &mut AttemptLifecycle, next: AttemptState) {
    if let Err(err) = lifecycle.advance(next) {
        tracing::error!(error = %err, "Attempt state machine violation");
    }
}

/// Drive an admitted attempt to `Released`. The permit is given back on
/// every path, including when this task is cancelled or unwinds.
pub(crate) async fn run_attempt(
    ctx: Arc<AttemptContext>,
    candidate: Candidate,
    permit: AdmissionPermit,
    mut lifecycle: AttemptLifecycle,
) -> AttemptReport {
    let started_at = Utc::now();
    step(&mut lifecycle, AttemptState::InFlight);

    let result = match generate(&ctx, &candidate).await {
        Ok(question) => {
            step(&mut lifecycle, AttemptState::Completed);
            Ok(question)
        }
        Err(err) => {
            step(&mut lifecycle, AttemptState::Failed);
            Err(err)
        }
    };
    let finished_at = Utc::now();

    record(&ctx.store, &candidate, &result, started_at, finished_at);

    permit.release();
    step(&mut lifecycle, AttemptState::Released);

    AttemptReport {
        candidate,
        lifecycle,
        result,
        started_at,
        finished_at,
    }
}

async fn generate(ctx: &AttemptContext, candidate: &Candidate) -> Result<Question, AttemptFailure> {
    let combo = &candidate.combo;
    if !ctx.config.supports(&combo.language, &combo.level) {
        return Err(AiError::UnsupportedCombo {
            language: combo.language.clone(),
            level: combo.level.clone(),
        }
        .into());
    }

    let request = GenerationRequest::new(combo)
        .with_length(ctx.config.length_for(&combo.level))
        .with_focus_topics(focus_topics(ctx, candidate));

    let content = call_generator(ctx, request).await?;

    let new = NewQuestion::new(
        combo.clone(),
        ctx.config.difficulty_score(&combo.language, &combo.level),
        content,
    );
    let question = ctx.store.insert_question(&new, Utc::now())?;

    if let Err(err) = ctx.scorer.initialize_question(&question) {
        tracing::warn!(question_id = question.id, error = %err, "Failed to initialize baseline scores");
    }
    if let (true, Some(user_id)) = (candidate.is_hint(), candidate.user_id()) {
        ctx.store.clear_hint(user_id, combo)?;
    }

    tracing::info!(
        question_id = question.id,
        combo = %combo,
        subject = %candidate.subject,
        generator = ctx.generator.name(),
        "Generated question"
    );
    Ok(question)
}

/// Provider call under the configured deadline. Runs on its own task so a
/// panicking provider surfaces as a failure instead of tearing down the attempt.
async fn call_generator(
    ctx: &AttemptContext,
    request: GenerationRequest,
) -> Result<crate::domain::QuestionContent, AttemptFailure> {
    let timeout = ctx.config.worker.generation_timeout();
    let generator = Arc::clone(&ctx.generator);
    let mut handle = tokio::spawn(async move { generator.generate(&request).await });

    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => Ok(result?),
        Ok(Err(join_err)) => Err(AttemptFailure::Panicked(join_err.to_string())),
        Err(_) => {
            handle.abort();
            Err(AiError::Timeout(timeout).into())
        }
    }
}

/// Most topics taken from the user's stored priority scores per attempt.
const HIGH_PRIORITY_TOPIC_LIMIT: usize = 5;

/// Topics to steer a hint-driven attempt toward: the user's weak topics first,
/// then topics whose stored priority scores average above the baseline.
fn focus_topics(ctx: &AttemptContext, candidate: &Candidate) -> Vec<String> {
    let Some(user_id) = candidate.user_id() else {
        return Vec::new();
    };
    let combo = &candidate.combo;
    let threshold = ctx.config.scoring.weak_area_accuracy_threshold;

    let weak: BTreeSet<String> = match ctx.store.performance_by_topic(user_id, &combo.language, &combo.level) {
        Ok(metrics) => metrics
            .into_iter()
            .filter(|(_, m)| is_weak_area(Some(m), threshold))
            .map(|(topic, _)| topic)
            .collect(),
        Err(err) => {
            tracing::warn!(user_id, error = %err, "Could not load topic performance");
            BTreeSet::new()
        }
    };

    let prioritized = ctx
        .store
        .high_priority_topics(user_id, combo, BASELINE_SCORE, HIGH_PRIORITY_TOPIC_LIMIT)
        .unwrap_or_else(|err| {
            tracing::warn!(user_id, error = %err, "Could not load high priority topics");
            Vec::new()
        });

    let mut topics: Vec<String> = weak.iter().cloned().collect();
    topics.extend(prioritized.into_iter().filter(|t| !weak.contains(t)));
    topics
}

fn record(
    store: &QuizStore,
    candidate: &Candidate,
    result: &Result<Question, AttemptFailure>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
) {
    let (outcome, error_class, error_message, question_id) = match result {
        Ok(question) => (AttemptOutcome::Completed, None, None, Some(question.id)),
        Err(err) => (
            AttemptOutcome::Failed,
            Some(err.class().as_str().to_string()),
            Some(err.to_string()),
            None,
        ),
    };
    let attempt = AttemptRecord {
        id: 0,
        language: candidate.combo.language.clone(),
        level: candidate.combo.level.clone(),
        question_type: candidate.combo.question_type,
        subject: candidate.subject.to_string(),
        outcome,
        error_class,
        error_message,
        question_id,
        started_at,
        finished_at,
    };
    if let Err(err) = store.record_attempt(&attempt) {
        tracing::warn!(combo = %candidate.combo, error = %err, "Failed to record generation attempt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{AdmissionController, AdmissionSubject};
    use crate::ai::MockQuestionGenerator;
    use crate::domain::{Combo, QuestionType, UserResponse};
    use crate::store::test_support;
    use crate::worker::candidates::CandidateSource;

    fn context(generator: Arc<dyn QuestionGenerator>, config: Config) -> Arc<AttemptContext> {
        let store = Arc::new(test_support::store());
        let scorer = Arc::new(PriorityScorer::new(Arc::clone(&store), &config.scoring));
        Arc::new(AttemptContext {
            store,
            scorer,
            generator,
            config: Arc::new(config),
        })
    }

    fn system_candidate(combo: Combo) -> Candidate {
        Candidate {
            combo,
            subject: AdmissionSubject::System,
            source: CandidateSource::Shortfall {
                available: 0,
                deficit: 10,
            },
        }
    }

    fn admitted(controller: &Arc<AdmissionController>) -> (AdmissionPermit, AttemptLifecycle) {
        let permit = controller.try_admit(AdmissionSubject::System).unwrap();
        let mut lifecycle = AttemptLifecycle::new();
        lifecycle.advance(AttemptState::AdmissionGranted).unwrap();
        (permit, lifecycle)
    }

    #[tokio::test]
    async fn test_success_persists_and_releases() {
        let ctx = context(Arc::new(MockQuestionGenerator::new()), Config::default());
        let controller = Arc::new(AdmissionController::new(1, 1));
        let (permit, lifecycle) = admitted(&controller);

        let combo = Combo::new("italian", "B1", QuestionType::Vocabulary);
        let report = run_attempt(Arc::clone(&ctx), system_candidate(combo.clone()), permit, lifecycle).await;

        let question = report.result.unwrap();
        assert_eq!(question.combo(), combo);
        assert!(question.difficulty_score > 0.0 && question.difficulty_score < 1.0);
        assert_eq!(report.lifecycle.state(), AttemptState::Released);
        assert_eq!(controller.stats().global_in_use, 0);
        assert!(ctx.store.recent_failures(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_combo_is_config_failure() {
        let mock = Arc::new(MockQuestionGenerator::new());
        let ctx = context(mock.clone(), Config::default());
        let controller = Arc::new(AdmissionController::new(1, 1));
        let (permit, lifecycle) = admitted(&controller);

        let combo = Combo::new("klingon", "A1", QuestionType::Qa);
        let report = run_attempt(Arc::clone(&ctx), system_candidate(combo), permit, lifecycle).await;

        let err = report.result.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Config);
        assert_eq!(mock.calls(), 0);
        assert_eq!(controller.stats().global_in_use, 0);

        let failures = ctx.store.recent_failures(10).unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_class.as_deref(), Some("config"));
        assert_eq!(failures[0].language, "klingon");
    }

    #[tokio::test]
    async fn test_timeout_is_retryable_failure() {
        let mock = Arc::new(MockQuestionGenerator::new().with_delay(std::time::Duration::from_secs(5)));
        let mut config = Config::default();
        config.worker.generation_timeout_secs = 0;
        let ctx = context(mock, config);
        let controller = Arc::new(AdmissionController::new(1, 1));
        let (permit, lifecycle) = admitted(&controller);

        let combo = Combo::new("italian", "A1", QuestionType::Qa);
        let report = run_attempt(ctx, system_candidate(combo), permit, lifecycle).await;

        assert!(matches!(report.result, Err(AttemptFailure::Ai(AiError::Timeout(_)))));
        assert!(report.lifecycle.history().contains(&AttemptState::Failed));
        assert_eq!(controller.stats().global_in_use, 0);
    }

    #[tokio::test]
    async fn test_hint_attempt_focuses_weak_and_high_priority_topics() {
        let mock = Arc::new(MockQuestionGenerator::new());
        let ctx = context(mock.clone(), Config::default());
        test_support::add_user(&ctx.store, 1);
        let combo = Combo::new("italian", "A1", QuestionType::Vocabulary);

        // missed answer makes "numbers" a weak topic
        let numbers = test_support::add_question(&ctx.store, QuestionType::Vocabulary, Utc::now());
        ctx.store
            .record_response(&UserResponse {
                user_id: 1,
                question_id: numbers.id,
                is_correct: false,
                response_time_ms: 3_000,
                created_at: Utc::now(),
            })
            .unwrap();

        let mut travel = test_support::content("Dove?");
        travel.topic = Some("travel".to_string());
        let travel = ctx
            .store
            .insert_question(&NewQuestion::new(combo.clone(), 0.0, travel), Utc::now())
            .unwrap();
        ctx.store
            .upsert_scores(1, &[(numbers.id, 300.0), (travel.id, 220.0)], Utc::now())
            .unwrap();

        let controller = Arc::new(AdmissionController::new(2, 2));
        let permit = controller.try_admit(AdmissionSubject::User(1)).unwrap();
        let mut lifecycle = AttemptLifecycle::new();
        lifecycle.advance(AttemptState::AdmissionGranted).unwrap();
        let candidate = Candidate {
            combo,
            subject: AdmissionSubject::User(1),
            source: CandidateSource::Hint {
                hint_id: 1,
                priority_weight: 1,
            },
        };
        let report = run_attempt(ctx, candidate, permit, lifecycle).await;
        assert!(report.result.is_ok());

        let requests = mock.requests();
        assert_eq!(
            requests[0].hints.focus_topics,
            vec!["numbers".to_string(), "travel".to_string()]
        );
    }

    #[tokio::test]
    async fn test_system_attempt_has_no_focus_topics() {
        let mock = Arc::new(MockQuestionGenerator::new());
        let ctx = context(mock.clone(), Config::default());
        let controller = Arc::new(AdmissionController::new(1, 1));
        let (permit, lifecycle) = admitted(&controller);

        let combo = Combo::new("italian", "A1", QuestionType::Qa);
        run_attempt(ctx, system_candidate(combo), permit, lifecycle).await;
        assert!(mock.requests()[0].hints.focus_topics.is_empty());
    }

    #[test]
    fn test_failure_classes() {
        assert_eq!(AttemptFailure::Panicked("boom".into()).class(), ErrorClass::Retryable);
        assert_eq!(
            AttemptFailure::Store(QuizError::Storage("disk".into())).class(),
            ErrorClass::Retryable
        );
        let config = AttemptFailure::Ai(AiError::Api {
            status: 401,
            message: "bad key".into(),
        });
        assert_eq!(config.class(), ErrorClass::Config);
        assert!(config.ai_error().is_some());
    }
}
