//! Candidate ranking and per-subject failure backoff.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::AdmissionSubject;
use crate::ai::AiError;
use crate::domain::{Combo, GenerationHint};

/// Why a combo is being generated this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum CandidateSource {
    Hint { hint_id: i64, priority_weight: i64 },
    Shortfall { available: usize, deficit: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub combo: Combo,
    pub subject: AdmissionSubject,
    pub source: CandidateSource,
}

impl Candidate {
    pub fn is_hint(&self) -> bool {
        matches!(self.source, CandidateSource::Hint { .. })
    }

    pub fn user_id(&self) -> Option<i64> {
        match self.subject {
            AdmissionSubject::User(id) => Some(id),
            AdmissionSubject::System => None,
        }
    }
}

/// Rank this cycle's work: every live hint first (heaviest first), then combos
/// of interest below `min_buffer`, largest deficit first. A combo already
/// covered by a hint is not also scheduled as a shortfall.
pub fn plan_candidates(
    hints: &[GenerationHint],
    interest: &BTreeSet<Combo>,
    inventory: &HashMap<Combo, usize>,
    min_buffer: usize,
    now: DateTime<Utc>,
) -> Vec<Candidate> {
    let mut live: Vec<&GenerationHint> = hints.iter().filter(|h| h.is_live(now)).collect();
    live.sort_by(|a, b| {
        b.priority_weight
            .cmp(&a.priority_weight)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    let mut candidates: Vec<Candidate> = live
        .iter()
        .map(|h| Candidate {
            combo: h.combo(),
            subject: AdmissionSubject::User(h.user_id),
            source: CandidateSource::Hint {
                hint_id: h.id,
                priority_weight: h.priority_weight,
            },
        })
        .collect();
    let hinted: BTreeSet<Combo> = candidates.iter().map(|c| c.combo.clone()).collect();

    let mut shortfalls: Vec<Candidate> = interest
        .iter()
        .filter(|combo| !hinted.contains(*combo))
        .filter_map(|combo| {
            let available = inventory.get(combo).copied().unwrap_or(0);
            let deficit = min_buffer.saturating_sub(available);
            (deficit > 0).then(|| Candidate {
                combo: combo.clone(),
                subject: AdmissionSubject::System,
                source: CandidateSource::Shortfall { available, deficit },
            })
        })
        .collect();
    // stable sort keeps combo order for equal deficits
    shortfalls.sort_by_key(|c| match c.source {
        CandidateSource::Shortfall { deficit, .. } => std::cmp::Reverse(deficit),
        CandidateSource::Hint { .. } => std::cmp::Reverse(0),
    });

    candidates.extend(shortfalls);
    candidates
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BackoffEntry {
    failures: u32,
    until: DateTime<Utc>,
}

/// Exponential backoff per (subject, combo): 2^n seconds after the n-th
/// consecutive retryable failure, capped. A success clears it.
#[derive(Debug, Clone)]
pub struct Backoff {
    max: Duration,
    entries: HashMap<(AdmissionSubject, Combo), BackoffEntry>,
}

impl Backoff {
    pub fn new(max: Duration) -> Self {
        Self {
            max,
            entries: HashMap::new(),
        }
    }

    pub fn delay_for(&self, failures: u32) -> Duration {
        let secs = 2u64.checked_pow(failures).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max)
    }

    /// Record a retryable failure; rate limits wait at least `retry_after`.
    pub fn record_failure(
        &mut self,
        subject: AdmissionSubject,
        combo: &Combo,
        error: Option<&AiError>,
        now: DateTime<Utc>,
    ) -> Duration {
        let failures = self
            .entries
            .get(&(subject, combo.clone()))
            .map(|e| e.failures)
            .unwrap_or(0)
            .saturating_add(1);
        let mut delay = self.delay_for(failures);
        if let Some(AiError::RateLimited { retry_after }) = error {
            delay = delay.max(*retry_after);
        }
        let until = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .insert((subject, combo.clone()), BackoffEntry { failures, until });
        delay
    }

    pub fn record_success(&mut self, subject: AdmissionSubject, combo: &Combo) {
        self.entries.remove(&(subject, combo.clone()));
    }

    pub fn is_backing_off(&self, subject: AdmissionSubject, combo: &Combo, now: DateTime<Utc>) -> bool {
        self.entries
            .get(&(subject, combo.clone()))
            .is_some_and(|e| e.until > now)
    }

    pub fn failures(&self, subject: AdmissionSubject, combo: &Combo) -> u32 {
        self.entries
            .get(&(subject, combo.clone()))
            .map(|e| e.failures)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuestionType;

    fn combo(level: &str, question_type: QuestionType) -> Combo {
        Combo::new("italian", level, question_type)
    }

    fn hint(id: i64, user_id: i64, combo: &Combo, weight: i64, now: DateTime<Utc>) -> GenerationHint {
        GenerationHint {
            id,
            user_id,
            language: combo.language.clone(),
            level: combo.level.clone(),
            question_type: combo.question_type,
            priority_weight: weight,
            expires_at: now + chrono::Duration::minutes(10),
            created_at: now,
        }
    }

    #[test]
    fn test_shortfalls_ordered_by_deficit() {
        let now = Utc::now();
        let a = combo("A1", QuestionType::Qa);
        let b = combo("A1", QuestionType::Vocabulary);
        let c = combo("A2", QuestionType::Qa);
        let interest: BTreeSet<Combo> = [a.clone(), b.clone(), c.clone()].into_iter().collect();
        let inventory: HashMap<Combo, usize> = [(a.clone(), 8), (b.clone(), 2), (c.clone(), 12)].into_iter().collect();

        let planned = plan_candidates(&[], &interest, &inventory, 10, now);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].combo, b);
        assert_eq!(planned[0].source, CandidateSource::Shortfall { available: 2, deficit: 8 });
        assert_eq!(planned[1].combo, a);
        assert!(planned.iter().all(|c| c.subject == AdmissionSubject::System));
    }

    #[test]
    fn test_hints_come_first_even_when_stocked() {
        let now = Utc::now();
        let stocked = combo("B1", QuestionType::FillBlank);
        let starving = combo("A1", QuestionType::Qa);
        let interest: BTreeSet<Combo> = [stocked.clone(), starving.clone()].into_iter().collect();
        let inventory: HashMap<Combo, usize> = [(stocked.clone(), 50)].into_iter().collect();
        let hints = vec![hint(1, 7, &stocked, 1, now)];

        let planned = plan_candidates(&hints, &interest, &inventory, 10, now);
        assert_eq!(planned.len(), 2);
        assert!(planned[0].is_hint());
        assert_eq!(planned[0].combo, stocked);
        assert_eq!(planned[0].user_id(), Some(7));
        assert_eq!(planned[1].combo, starving);
    }

    #[test]
    fn test_hints_by_weight_and_expired_dropped() {
        let now = Utc::now();
        let a = combo("A1", QuestionType::Qa);
        let b = combo("A2", QuestionType::Qa);
        let mut expired = hint(3, 1, &b, 99, now);
        expired.expires_at = now - chrono::Duration::seconds(1);
        let hints = vec![hint(1, 1, &a, 1, now), hint(2, 2, &b, 5, now), expired];

        let planned = plan_candidates(&hints, &BTreeSet::new(), &HashMap::new(), 10, now);
        assert_eq!(planned.len(), 2);
        assert_eq!(planned[0].subject, AdmissionSubject::User(2));
        assert_eq!(planned[1].subject, AdmissionSubject::User(1));
    }

    #[test]
    fn test_hinted_combo_not_duplicated_as_shortfall() {
        let now = Utc::now();
        let a = combo("A1", QuestionType::Qa);
        let interest: BTreeSet<Combo> = [a.clone()].into_iter().collect();
        let planned = plan_candidates(&[hint(1, 1, &a, 1, now)], &interest, &HashMap::new(), 10, now);
        assert_eq!(planned.len(), 1);
        assert!(planned[0].is_hint());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(60));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(200), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_window_and_reset() {
        let now = Utc::now();
        let a = combo("A1", QuestionType::Qa);
        let mut backoff = Backoff::new(Duration::from_secs(3600));

        let delay = backoff.record_failure(AdmissionSubject::System, &a, None, now);
        assert_eq!(delay, Duration::from_secs(2));
        assert!(backoff.is_backing_off(AdmissionSubject::System, &a, now));
        assert!(!backoff.is_backing_off(AdmissionSubject::User(1), &a, now));
        assert!(!backoff.is_backing_off(AdmissionSubject::System, &a, now + chrono::Duration::seconds(3)));

        backoff.record_failure(AdmissionSubject::System, &a, None, now);
        assert_eq!(backoff.failures(AdmissionSubject::System, &a), 2);

        backoff.record_success(AdmissionSubject::System, &a);
        assert!(backoff.is_empty());
    }

    #[test]
    fn test_rate_limit_respects_retry_after() {
        let now = Utc::now();
        let a = combo("A1", QuestionType::Qa);
        let mut backoff = Backoff::new(Duration::from_secs(3600));
        let err = AiError::RateLimited {
            retry_after: Duration::from_secs(90),
        };
        let delay = backoff.record_failure(AdmissionSubject::User(3), &a, Some(&err), now);
        assert_eq!(delay, Duration::from_secs(90));
    }
}
