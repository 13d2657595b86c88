//! Daily question selection.
//!
//! For a (user, date) with no rows yet, the day's goal is split into fresh and
//! review slots:
//! - Fresh pool: eligible questions never assigned to the user, by score desc then oldest first
//! - Review pool: questions the user answered before, minus those answered correctly
//!   within the review interval, by score desc
//!
//! A short pool is backfilled from the other one. Running out of both is not an
//! error; the day simply gets fewer questions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Days, Duration, NaiveDate, Utc};

use crate::config::DailyConfig;
use crate::daily::calendar::{local_today, user_local_day_range};
use crate::domain::{
    DailyProgress, DailyQuestionAssignment, Question, QuestionHistoryEntry, User, UserLearningPreferences,
};
use crate::error::{QuizError, Result};
use crate::scoring::BASELINE_SCORE;
use crate::store::QuizStore;

/// How many questions short of the goal a day came out.
pub fn shortfall(goal: usize, assigned: usize) -> usize {
    goal.saturating_sub(assigned)
}

/// Ordered pick of question ids for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub fresh: Vec<i64>,
    pub review: Vec<i64>,
}

impl Selection {
    pub fn len(&self) -> usize {
        self.fresh.len() + self.review.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<i64> {
        self.fresh.iter().chain(self.review.iter()).copied().collect()
    }
}

/// Everything the pure selection step needs, loaded from the store.
#[derive(Debug, Default)]
pub struct SelectionInputs {
    pub eligible: Vec<Question>,
    pub scores: HashMap<i64, f64>,
    pub ever_assigned: HashSet<i64>,
    pub answered: HashSet<i64>,
    pub last_correct: HashMap<i64, DateTime<Utc>>,
}

fn sort_by_priority(pool: &mut [&Question], scores: &HashMap<i64, f64>) {
    let score_of = |q: &Question| scores.get(&q.id).copied().unwrap_or(BASELINE_SCORE);
    pool.sort_by(|a, b| {
        score_of(b)
            .total_cmp(&score_of(a))
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

/// Pick the day's questions. Pure; `now` drives the review recency filter.
pub fn select(inputs: &SelectionInputs, prefs: &UserLearningPreferences, now: DateTime<Utc>) -> Selection {
    let prefs = prefs.clamped();
    let (fresh_target, review_target) = prefs.partition();
    let goal = fresh_target + review_target;
    let interval = Duration::try_days(prefs.review_interval_days).unwrap_or(Duration::MAX);

    let mut fresh_pool: Vec<&Question> = inputs
        .eligible
        .iter()
        .filter(|q| !inputs.ever_assigned.contains(&q.id))
        .collect();
    sort_by_priority(&mut fresh_pool, &inputs.scores);

    let recently_correct =
        |q: &Question| matches!(inputs.last_correct.get(&q.id), Some(at) if now - *at < interval);
    let mut review_pool: Vec<&Question> = inputs
        .eligible
        .iter()
        .filter(|q| inputs.answered.contains(&q.id) && !recently_correct(q))
        .collect();
    sort_by_priority(&mut review_pool, &inputs.scores);

    let mut selection = Selection::default();
    let mut taken: HashSet<i64> = HashSet::new();

    for q in fresh_pool.iter().take(fresh_target) {
        taken.insert(q.id);
        selection.fresh.push(q.id);
    }

    // unused fresh slots roll over to review
    let review_budget = goal - selection.fresh.len();
    for q in &review_pool {
        if selection.review.len() >= review_budget {
            break;
        }
        if taken.insert(q.id) {
            selection.review.push(q.id);
        }
    }

    // unused review slots go back to fresh
    for q in &fresh_pool {
        if selection.len() >= goal {
            break;
        }
        if taken.insert(q.id) {
            selection.fresh.push(q.id);
        }
    }

    selection
}

pub struct DailySelector {
    store: Arc<QuizStore>,
    config: DailyConfig,
}

impl DailySelector {
    pub fn new(store: Arc<QuizStore>, config: DailyConfig) -> Self {
        Self { store, config }
    }

    /// Preferences for selection; users without saved preferences get the configured goal.
    pub fn preferences_for(&self, user_id: i64) -> Result<UserLearningPreferences> {
        let prefs = match self.store.get_preferences(user_id)? {
            Some(prefs) => prefs,
            None => UserLearningPreferences {
                daily_goal: self.config.default_goal,
                ..Default::default()
            },
        };
        Ok(prefs.clamped())
    }

    pub fn assign_for_date(&self, user_id: i64, date: NaiveDate) -> Result<Vec<DailyQuestionAssignment>> {
        self.assign_for_date_at(user_id, date, Utc::now())
    }

    /// Assign the day's questions, or return the rows already there.
    ///
    /// Past dates only ever return what was stored. Dates further ahead than the
    /// configured horizon from the user's local today are rejected.
    pub fn assign_for_date_at(
        &self,
        user_id: i64,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyQuestionAssignment>> {
        let user = self.store.require_user(user_id)?;
        let today = local_today(user.utc_offset_minutes, now);
        let horizon = today
            .checked_add_days(Days::new(self.config.horizon_days.max(0) as u64))
            .unwrap_or(NaiveDate::MAX);
        if date > horizon {
            return Err(QuizError::Validation(format!(
                "assignment date {} is after {} for user {}",
                date, horizon, user_id
            )));
        }

        let existing = self.store.assignments_for(user_id, date)?;
        if !existing.is_empty() || date < today {
            return Ok(existing);
        }

        let prefs = self.preferences_for(user_id)?;
        let inputs = self.load_inputs(&user)?;
        let selection = select(&inputs, &prefs, now);
        let goal = prefs.daily_goal as usize;

        let inserted = self.store.insert_daily_set(user_id, date, &selection.ids(), now)?;
        let rows = self.store.assignments_for(user_id, date)?;

        tracing::info!(
            user_id,
            %date,
            fresh = selection.fresh.len(),
            review = selection.review.len(),
            inserted,
            "Assigned daily questions"
        );
        let missing = shortfall(goal, rows.len());
        if missing > 0 {
            tracing::info!(user_id, %date, goal, missing, "Daily assignment short of goal");
        }

        Ok(rows)
    }

    fn load_inputs(&self, user: &User) -> Result<SelectionInputs> {
        Ok(SelectionInputs {
            eligible: self.store.eligible_questions(user)?,
            scores: self.store.scores_for_user(user.id)?,
            ever_assigned: self.store.assigned_question_ids(user.id)?,
            answered: self.store.answered_question_ids(user.id)?,
            last_correct: self.store.last_correct_by_question(user.id)?,
        })
    }

    pub fn mark_completed(&self, user_id: i64, question_id: i64, date: NaiveDate) -> Result<()> {
        self.set_completed(user_id, question_id, date, true)
    }

    pub fn reset_completed(&self, user_id: i64, question_id: i64, date: NaiveDate) -> Result<()> {
        self.set_completed(user_id, question_id, date, false)
    }

    fn set_completed(&self, user_id: i64, question_id: i64, date: NaiveDate, completed: bool) -> Result<()> {
        if !self
            .store
            .set_assignment_completed(user_id, question_id, date, completed, Utc::now())?
        {
            return Err(QuizError::NotFound(format!(
                "assignment for user {} question {} on {}",
                user_id, question_id, date
            )));
        }
        Ok(())
    }

    pub fn daily_progress(&self, user_id: i64, date: NaiveDate) -> Result<DailyProgress> {
        let (completed, total) = self.store.assignment_counts(user_id, date)?;
        Ok(DailyProgress { date, completed, total })
    }

    /// Dates the user has assignments for, newest first.
    pub fn available_dates(&self, user_id: i64) -> Result<Vec<NaiveDate>> {
        self.store.assignment_dates(user_id)
    }

    pub fn question_history(&self, user_id: i64, question_id: i64, days: i64) -> Result<Vec<QuestionHistoryEntry>> {
        self.question_history_at(user_id, question_id, days, Utc::now())
    }

    /// Days in the last `days` local days (today included) the question was
    /// assigned, oldest first, each with the last answer given that day.
    pub fn question_history_at(
        &self,
        user_id: i64,
        question_id: i64,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<QuestionHistoryEntry>> {
        if days <= 0 {
            return Err(QuizError::Validation(format!("history days must be positive, got {}", days)));
        }
        let user = self.store.require_user(user_id)?;
        let offset = user.utc_offset_minutes;
        let (start, _) = user_local_day_range(offset, days, now);
        let since = local_today(offset, start);

        let assignments = self.store.question_assignments_since(user_id, question_id, since)?;
        let responses = self.store.responses_since(user_id, question_id, start)?;

        let history = assignments
            .into_iter()
            .map(|a| {
                let is_correct = responses
                    .iter()
                    .rev()
                    .find(|(at, _)| local_today(offset, *at) == a.assignment_date)
                    .map(|(_, correct)| *correct);
                QuestionHistoryEntry {
                    assignment_date: a.assignment_date,
                    is_completed: a.is_completed,
                    completed_at: a.completed_at,
                    is_correct,
                }
            })
            .collect();
        Ok(history)
    }

    /// Goal minus rows assigned for the date.
    pub fn shortfall_for(&self, user_id: i64, date: NaiveDate) -> Result<usize> {
        let goal = self.preferences_for(user_id)?.daily_goal as usize;
        let (_, total) = self.store.assignment_counts(user_id, date)?;
        Ok(shortfall(goal, total))
    }
}
