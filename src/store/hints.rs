//! Generation hint rows.

use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use super::{QuizStore, from_ms, parse_question_type, to_ms};
use crate::domain::{Combo, GenerationHint};
use crate::error::Result;

const HINT_COLUMNS: &str = "id, user_id, language, level, question_type, priority_weight, expires_at, created_at";

fn row_to_hint(row: &Row<'_>) -> rusqlite::Result<GenerationHint> {
    let raw_type: String = row.get(4)?;
    Ok(GenerationHint {
        id: row.get(0)?,
        user_id: row.get(1)?,
        language: row.get(2)?,
        level: row.get(3)?,
        question_type: parse_question_type(4, &raw_type)?,
        priority_weight: row.get(5)?,
        expires_at: from_ms(row.get(6)?),
        created_at: from_ms(row.get(7)?),
    })
}

impl QuizStore {
    /// Insert a hint, or refresh an existing one: weight goes up by one and the expiry moves.
    pub fn upsert_hint(
        &self,
        user_id: i64,
        combo: &Combo,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<GenerationHint> {
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO generation_hints
                (user_id, language, level, question_type, priority_weight, expires_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?6)
            ON CONFLICT(user_id, language, level, question_type) DO UPDATE SET
                priority_weight = generation_hints.priority_weight + 1,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
            params![
                user_id,
                combo.language,
                combo.level,
                combo.question_type.as_str(),
                to_ms(expires_at),
                to_ms(now),
            ],
        )?;
        let hint = db.query_row(
            &format!(
                "SELECT {} FROM generation_hints \
                 WHERE user_id = ?1 AND language = ?2 AND level = ?3 AND question_type = ?4",
                HINT_COLUMNS
            ),
            params![user_id, combo.language, combo.level, combo.question_type.as_str()],
            row_to_hint,
        )?;
        Ok(hint)
    }

    /// Unexpired hints, heaviest first.
    pub fn active_hints(&self, now: DateTime<Utc>) -> Result<Vec<GenerationHint>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM generation_hints WHERE expires_at > ?1 \
             ORDER BY priority_weight DESC, created_at ASC, id ASC",
            HINT_COLUMNS
        ))?;
        let hints = stmt
            .query_map([to_ms(now)], row_to_hint)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(hints)
    }

    /// Remove a user's hint for a combo. Returns whether one existed.
    pub fn clear_hint(&self, user_id: i64, combo: &Combo) -> Result<bool> {
        let deleted = self.conn()?.execute(
            "DELETE FROM generation_hints WHERE user_id = ?1 AND language = ?2 AND level = ?3 AND question_type = ?4",
            params![user_id, combo.language, combo.level, combo.question_type.as_str()],
        )?;
        Ok(deleted > 0)
    }
}
