//! Users, learning preferences, per-question metadata, responses and topic rollups.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{QuizStore, conversion_error, from_ms, to_ms};
use crate::domain::{PerformanceMetrics, QuestionType, User, UserLearningPreferences, UserQuestionMetadata, UserResponse};
use crate::error::{QuizError, Result};

const USER_COLUMNS: &str =
    "id, username, preferred_language, current_level, utc_offset_minutes, question_types, ai_enabled";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let raw_types: String = row.get(5)?;
    let question_types: Vec<QuestionType> =
        serde_json::from_str(&raw_types).map_err(|e| conversion_error(5, format!("bad question_types: {}", e)))?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        preferred_language: row.get(2)?,
        current_level: row.get(3)?,
        utc_offset_minutes: row.get(4)?,
        question_types,
        ai_enabled: row.get(6)?,
    })
}

impl QuizStore {
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let types = serde_json::to_string(&user.question_types)?;
        self.conn()?.execute(
            r#"
            INSERT INTO users (id, username, preferred_language, current_level, utc_offset_minutes, question_types, ai_enabled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                preferred_language = excluded.preferred_language,
                current_level = excluded.current_level,
                utc_offset_minutes = excluded.utc_offset_minutes,
                question_types = excluded.question_types,
                ai_enabled = excluded.ai_enabled
            "#,
            params![
                user.id,
                user.username,
                user.preferred_language,
                user.current_level,
                user.utc_offset_minutes,
                types,
                user.ai_enabled,
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        let db = self.conn()?;
        let user = db
            .query_row(
                &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
                [user_id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Fetch a user or fail with `NotFound`.
    pub fn require_user(&self, user_id: i64) -> Result<User> {
        self.get_user(user_id)?
            .ok_or_else(|| QuizError::NotFound(format!("user {}", user_id)))
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS))?;
        let users = stmt.query_map([], row_to_user)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Users studying the given language at the given level.
    pub fn users_for_level(&self, language: &str, level: &str) -> Result<Vec<User>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM users WHERE preferred_language = ?1 AND current_level = ?2 ORDER BY id",
            USER_COLUMNS
        ))?;
        let users = stmt
            .query_map(params![language, level], row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn get_preferences(&self, user_id: i64) -> Result<Option<UserLearningPreferences>> {
        let db = self.conn()?;
        let prefs = db
            .query_row(
                r#"
                SELECT focus_on_weak_areas, fresh_question_ratio, known_question_penalty,
                       review_interval_days, weak_area_boost, daily_goal
                FROM user_learning_preferences WHERE user_id = ?1
                "#,
                [user_id],
                |row| {
                    Ok(UserLearningPreferences {
                        focus_on_weak_areas: row.get(0)?,
                        fresh_question_ratio: row.get(1)?,
                        known_question_penalty: row.get(2)?,
                        review_interval_days: row.get(3)?,
                        weak_area_boost: row.get(4)?,
                        daily_goal: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    /// Persist preferences, clamped into their declared ranges.
    pub fn save_preferences(&self, user_id: i64, prefs: &UserLearningPreferences) -> Result<UserLearningPreferences> {
        let prefs = prefs.clamped();
        self.conn()?.execute(
            r#"
            INSERT INTO user_learning_preferences
                (user_id, focus_on_weak_areas, fresh_question_ratio, known_question_penalty,
                 review_interval_days, weak_area_boost, daily_goal, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                focus_on_weak_areas = excluded.focus_on_weak_areas,
                fresh_question_ratio = excluded.fresh_question_ratio,
                known_question_penalty = excluded.known_question_penalty,
                review_interval_days = excluded.review_interval_days,
                weak_area_boost = excluded.weak_area_boost,
                daily_goal = excluded.daily_goal,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                prefs.focus_on_weak_areas,
                prefs.fresh_question_ratio,
                prefs.known_question_penalty,
                prefs.review_interval_days,
                prefs.weak_area_boost,
                prefs.daily_goal,
                to_ms(Utc::now()),
            ],
        )?;
        Ok(prefs)
    }

    pub fn upsert_metadata(&self, user_id: i64, question_id: i64, metadata: &UserQuestionMetadata) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO user_question_metadata (user_id, question_id, marked_as_known, confidence_level, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, question_id) DO UPDATE SET
                marked_as_known = excluded.marked_as_known,
                confidence_level = excluded.confidence_level,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                question_id,
                metadata.marked_as_known,
                metadata.confidence_level,
                to_ms(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn metadata_for_user(&self, user_id: i64) -> Result<HashMap<i64, UserQuestionMetadata>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT question_id, marked_as_known, confidence_level FROM user_question_metadata WHERE user_id = ?1",
        )?;
        let rows = stmt.query_map([user_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                UserQuestionMetadata {
                    marked_as_known: row.get(1)?,
                    confidence_level: row.get(2)?,
                },
            ))
        })?;
        let map = rows.collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(map)
    }

    /// Record an answer: append the response, bump the question's usage count
    /// and roll the result into the topic's performance metrics.
    pub fn record_response(&self, response: &UserResponse) -> Result<()> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;

        tx.execute(
            r#"
            INSERT INTO user_responses (user_id, question_id, is_correct, response_time_ms, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                response.user_id,
                response.question_id,
                response.is_correct,
                response.response_time_ms,
                to_ms(response.created_at),
            ],
        )?;

        let updated = tx.execute(
            "UPDATE questions SET usage_count = usage_count + 1 WHERE id = ?1",
            [response.question_id],
        )?;
        if updated == 0 {
            return Err(QuizError::NotFound(format!("question {}", response.question_id)));
        }

        let (topic, language, level): (Option<String>, String, String) = tx.query_row(
            "SELECT topic, language, level FROM questions WHERE id = ?1",
            [response.question_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        if let Some(topic) = topic {
            tx.execute(
                r#"
                INSERT INTO performance_metrics
                    (user_id, topic, language, level, total_attempts, correct_attempts,
                     average_response_time_ms, last_updated)
                VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)
                ON CONFLICT(user_id, topic, language, level) DO UPDATE SET
                    total_attempts = performance_metrics.total_attempts + 1,
                    correct_attempts = performance_metrics.correct_attempts + excluded.correct_attempts,
                    average_response_time_ms =
                        (performance_metrics.average_response_time_ms * performance_metrics.total_attempts
                            + excluded.average_response_time_ms)
                        / (performance_metrics.total_attempts + 1),
                    last_updated = excluded.last_updated
                "#,
                params![
                    response.user_id,
                    topic,
                    language,
                    level,
                    if response.is_correct { 1 } else { 0 },
                    response.response_time_ms as f64,
                    to_ms(response.created_at),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Most recent correct answer time per question for a user.
    pub fn last_correct_by_question(&self, user_id: i64) -> Result<HashMap<i64, DateTime<Utc>>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT question_id, MAX(created_at) FROM user_responses
            WHERE user_id = ?1 AND is_correct = 1
            GROUP BY question_id
            "#,
        )?;
        let rows = stmt.query_map([user_id], |row| Ok((row.get::<_, i64>(0)?, from_ms(row.get(1)?))))?;
        let map = rows.collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(map)
    }

    /// (answered_at, is_correct) for one question since `since`, oldest first.
    pub fn responses_since(
        &self,
        user_id: i64,
        question_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, bool)>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT created_at, is_correct FROM user_responses
            WHERE user_id = ?1 AND question_id = ?2 AND created_at >= ?3
            ORDER BY created_at, id
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, question_id, to_ms(since)], |row| {
                Ok((from_ms(row.get(0)?), row.get::<_, bool>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Questions the user has answered at least once.
    pub fn answered_question_ids(&self, user_id: i64) -> Result<HashSet<i64>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT DISTINCT question_id FROM user_responses WHERE user_id = ?1")?;
        let ids = stmt
            .query_map([user_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Topic rollups for one user at one language/level, keyed by topic.
    pub fn performance_by_topic(
        &self,
        user_id: i64,
        language: &str,
        level: &str,
    ) -> Result<HashMap<String, PerformanceMetrics>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT user_id, topic, language, level, total_attempts, correct_attempts,
                   average_response_time_ms, last_updated
            FROM performance_metrics
            WHERE user_id = ?1 AND language = ?2 AND level = ?3
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, language, level], |row| {
            Ok(PerformanceMetrics {
                user_id: row.get(0)?,
                topic: row.get(1)?,
                language: row.get(2)?,
                level: row.get(3)?,
                total_attempts: row.get(4)?,
                correct_attempts: row.get(5)?,
                average_response_time_ms: row.get(6)?,
                last_updated: from_ms(row.get(7)?),
            })
        })?;

        let mut map = HashMap::new();
        for row in rows {
            let metrics = row?;
            map.insert(metrics.topic.clone(), metrics);
        }
        Ok(map)
    }
}
