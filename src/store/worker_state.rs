//! Persisted worker controls and the generation attempt log.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{QuizStore, conversion_error, from_ms, parse_question_type, to_ms};
use crate::domain::{AttemptOutcome, AttemptRecord};
use crate::error::Result;

const GLOBAL_PAUSE_KEY: &str = "global_paused";

impl QuizStore {
    pub fn is_globally_paused(&self) -> Result<bool> {
        let value: Option<String> = self
            .conn()?
            .query_row("SELECT value FROM worker_flags WHERE key = ?1", [GLOBAL_PAUSE_KEY], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value.as_deref() == Some("true"))
    }

    pub fn set_globally_paused(&self, paused: bool) -> Result<()> {
        self.conn()?.execute(
            r#"
            INSERT INTO worker_flags (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
            params![GLOBAL_PAUSE_KEY, if paused { "true" } else { "false" }],
        )?;
        Ok(())
    }

    pub fn set_user_paused(&self, user_id: i64, paused: bool, now: DateTime<Utc>) -> Result<()> {
        let db = self.conn()?;
        if paused {
            db.execute(
                "INSERT INTO paused_users (user_id, paused_at) VALUES (?1, ?2) ON CONFLICT(user_id) DO NOTHING",
                params![user_id, to_ms(now)],
            )?;
        } else {
            db.execute("DELETE FROM paused_users WHERE user_id = ?1", [user_id])?;
        }
        Ok(())
    }

    pub fn paused_user_ids(&self) -> Result<HashSet<i64>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT user_id FROM paused_users")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Append an attempt to the log and return its id.
    pub fn record_attempt(&self, attempt: &AttemptRecord) -> Result<i64> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO generation_attempts
                (language, level, question_type, subject, outcome, error_class, error_message,
                 question_id, started_at, finished_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                attempt.language,
                attempt.level,
                attempt.question_type.as_str(),
                attempt.subject,
                attempt.outcome.as_str(),
                attempt.error_class,
                attempt.error_message,
                attempt.question_id,
                to_ms(attempt.started_at),
                to_ms(attempt.finished_at),
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Most recent failed attempts, newest first.
    pub fn recent_failures(&self, limit: usize) -> Result<Vec<AttemptRecord>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, language, level, question_type, subject, outcome, error_class, error_message,
                   question_id, started_at, finished_at
            FROM generation_attempts
            WHERE outcome = 'failed'
            ORDER BY finished_at DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                let raw_type: String = row.get(3)?;
                let raw_outcome: String = row.get(5)?;
                Ok(AttemptRecord {
                    id: row.get(0)?,
                    language: row.get(1)?,
                    level: row.get(2)?,
                    question_type: parse_question_type(3, &raw_type)?,
                    subject: row.get(4)?,
                    outcome: AttemptOutcome::parse(&raw_outcome)
                        .ok_or_else(|| conversion_error(5, format!("unknown outcome {:?}", raw_outcome)))?,
                    error_class: row.get(6)?,
                    error_message: row.get(7)?,
                    question_id: row.get(8)?,
                    started_at: from_ms(row.get(9)?),
                    finished_at: from_ms(row.get(10)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
