//! Per (user, question) priority scores.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{QuizStore, to_ms};
use crate::domain::Combo;
use crate::error::Result;

impl QuizStore {
    /// Write scores for one user in a single transaction, one row per question.
    pub fn upsert_scores(&self, user_id: i64, scores: &[(i64, f64)], now: DateTime<Utc>) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO question_priority_scores (user_id, question_id, priority_score, last_calculated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id, question_id) DO UPDATE SET
                    priority_score = excluded.priority_score,
                    last_calculated_at = excluded.last_calculated_at
                "#,
            )?;
            for (question_id, score) in scores {
                stmt.execute(params![user_id, question_id, score, to_ms(now)])?;
            }
        }
        tx.commit()?;
        Ok(scores.len())
    }

    /// Insert a starting score for each user that has none yet. Returns rows created.
    pub fn insert_baseline_scores(
        &self,
        question_id: i64,
        user_ids: &[i64],
        baseline: f64,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO question_priority_scores (user_id, question_id, priority_score, last_calculated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id, question_id) DO NOTHING
                "#,
            )?;
            for user_id in user_ids {
                inserted += stmt.execute(params![user_id, question_id, baseline, to_ms(now)])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn get_score(&self, user_id: i64, question_id: i64) -> Result<Option<f64>> {
        let score = self
            .conn()?
            .query_row(
                "SELECT priority_score FROM question_priority_scores WHERE user_id = ?1 AND question_id = ?2",
                params![user_id, question_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(score)
    }

    pub fn scores_for_user(&self, user_id: i64) -> Result<HashMap<i64, f64>> {
        let db = self.conn()?;
        let mut stmt =
            db.prepare("SELECT question_id, priority_score FROM question_priority_scores WHERE user_id = ?1")?;
        let scores = stmt
            .query_map([user_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(scores)
    }

    /// Topics in a combo whose average score for the user is above `min_score`,
    /// highest average first.
    pub fn high_priority_topics(
        &self,
        user_id: i64,
        combo: &Combo,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT q.topic, AVG(s.priority_score) AS avg_score
            FROM questions q
            JOIN question_priority_scores s ON s.question_id = q.id AND s.user_id = ?1
            WHERE q.language = ?2 AND q.level = ?3 AND q.question_type = ?4
              AND q.topic IS NOT NULL AND q.topic != ''
            GROUP BY q.topic
            HAVING AVG(s.priority_score) > ?5
            ORDER BY avg_score DESC, q.topic
            LIMIT ?6
            "#,
        )?;
        let topics = stmt
            .query_map(
                params![
                    user_id,
                    combo.language,
                    combo.level,
                    combo.question_type.as_str(),
                    min_score,
                    limit as i64
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }
}
