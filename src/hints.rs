//! Generation hints: short-lived "generate this combo now" requests.
//!
//! Hints are never deleted on expiry; readers filter on `expires_at`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::HintConfig;
use crate::domain::{Combo, GenerationHint, User};
use crate::error::Result;
use crate::store::QuizStore;

pub struct HintService {
    store: Arc<QuizStore>,
    ttl: Duration,
}

impl HintService {
    pub fn new(store: Arc<QuizStore>, config: &HintConfig) -> Self {
        Self {
            store,
            ttl: i64::try_from(config.ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    /// Record or refresh a hint for the user's combo.
    pub fn upsert_hint(&self, user_id: i64, combo: &Combo) -> Result<GenerationHint> {
        self.upsert_hint_at(user_id, combo, Utc::now())
    }

    pub fn upsert_hint_at(&self, user_id: i64, combo: &Combo, now: DateTime<Utc>) -> Result<GenerationHint> {
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let hint = self.store.upsert_hint(user_id, combo, expires_at, now)?;
        tracing::info!(
            user_id,
            combo = %combo,
            priority_weight = hint.priority_weight,
            "Generation hint recorded"
        );
        Ok(hint)
    }

    /// Hint every combo the user practices, e.g. after a daily set came up short.
    pub fn hint_user_combos(&self, user: &User, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        user.combos()
            .iter()
            .map(|combo| self.upsert_hint_at(user.id, combo, now))
            .collect()
    }

    pub fn active_hints(&self, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        self.store.active_hints(now)
    }

    pub fn clear_hint(&self, user_id: i64, combo: &Combo) -> Result<bool> {
        self.store.clear_hint(user_id, combo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuestionType;
    use crate::store::test_support::add_user;

    fn service() -> (HintService, Arc<QuizStore>) {
        let store = Arc::new(QuizStore::open_in_memory().unwrap());
        add_user(&store, 1);
        add_user(&store, 2);
        (HintService::new(store.clone(), &HintConfig { ttl_secs: 600 }), store)
    }

    #[test]
    fn test_upsert_increments_weight_and_refreshes_expiry() {
        let (hints, _store) = service();
        let combo = Combo::new("italian", "A1", QuestionType::Qa);
        let t0 = Utc::now();

        let first = hints.upsert_hint_at(1, &combo, t0).unwrap();
        assert_eq!(first.priority_weight, 1);

        let second = hints.upsert_hint_at(1, &combo, t0 + Duration::seconds(300)).unwrap();
        assert_eq!(second.priority_weight, 2);
        assert_eq!(second.id, first.id);
        assert!(second.expires_at > first.expires_at);
    }

    #[test]
    fn test_active_hints_filters_expired_and_orders_by_weight() {
        let (hints, _store) = service();
        let t0 = Utc::now();
        let light = Combo::new("italian", "A1", QuestionType::Vocabulary);
        let heavy = Combo::new("italian", "A1", QuestionType::FillBlank);
        let stale = Combo::new("italian", "A1", QuestionType::Qa);

        hints.upsert_hint_at(1, &stale, t0 - Duration::seconds(700)).unwrap();
        hints.upsert_hint_at(1, &light, t0).unwrap();
        hints.upsert_hint_at(2, &heavy, t0).unwrap();
        hints.upsert_hint_at(2, &heavy, t0).unwrap();

        let active = hints.active_hints(t0).unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].combo(), heavy);
        assert_eq!(active[1].combo(), light);

        assert!(hints.active_hints(t0 + Duration::seconds(601)).unwrap().is_empty());
    }

    #[test]
    fn test_hint_user_combos() {
        let (hints, store) = service();
        let mut user = store.require_user(1).unwrap();
        user.question_types = vec![QuestionType::Qa, QuestionType::ReadingComprehension];

        let created = hints.hint_user_combos(&user, Utc::now()).unwrap();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|h| h.user_id == 1 && h.priority_weight == 1));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let store = Arc::new(QuizStore::open_in_memory().unwrap());
        add_user(&store, 1);
        let hints = HintService::new(store, &HintConfig { ttl_secs: u64::MAX });
        let combo = Combo::new("italian", "A1", QuestionType::Qa);
        let now = Utc::now();

        let hint = hints.upsert_hint_at(1, &combo, now).unwrap();
        assert!(hint.expires_at > now + Duration::days(365 * 100));
        assert_eq!(hints.active_hints(now).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_hint() {
        let (hints, _store) = service();
        let combo = Combo::new("italian", "A1", QuestionType::Qa);
        hints.upsert_hint(1, &combo).unwrap();
        assert!(hints.clear_hint(1, &combo).unwrap());
        assert!(!hints.clear_hint(1, &combo).unwrap());
        assert!(hints.active_hints(Utc::now()).unwrap().is_empty());
    }
}
