//! Question inventory.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use super::{QuizStore, conversion_error, from_ms, parse_question_type, to_ms};
use crate::domain::{Combo, NewQuestion, Question, QuestionContent, QuestionStatus, User};
use crate::error::{QuizError, Result};

const QUESTION_COLUMNS: &str = "id, question_type, language, level, difficulty_score, content, correct_answer, \
                                topic, status, usage_count, created_at";

fn row_to_question(row: &Row<'_>) -> rusqlite::Result<Question> {
    let raw_type: String = row.get(1)?;
    let raw_content: String = row.get(5)?;
    let raw_status: String = row.get(8)?;
    let content: QuestionContent =
        serde_json::from_str(&raw_content).map_err(|e| conversion_error(5, format!("bad content: {}", e)))?;
    let status = QuestionStatus::parse(&raw_status)
        .ok_or_else(|| conversion_error(8, format!("unknown status {:?}", raw_status)))?;
    let correct_answer: i64 = row.get(6)?;
    Ok(Question {
        id: row.get(0)?,
        question_type: parse_question_type(1, &raw_type)?,
        language: row.get(2)?,
        level: row.get(3)?,
        difficulty_score: row.get(4)?,
        content,
        correct_answer: correct_answer.max(0) as usize,
        topic: row.get(7)?,
        status,
        usage_count: row.get(9)?,
        created_at: from_ms(row.get(10)?),
    })
}

impl QuizStore {
    /// Insert a new question and return the stored row.
    pub fn insert_question(&self, new: &NewQuestion, now: DateTime<Utc>) -> Result<Question> {
        let content = serde_json::to_string(&new.content)?;
        let db = self.conn()?;
        db.execute(
            r#"
            INSERT INTO questions
                (question_type, language, level, difficulty_score, content, correct_answer,
                 topic, status, usage_count, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'active', 0, ?8)
            "#,
            params![
                new.combo.question_type.as_str(),
                new.combo.language,
                new.combo.level,
                new.difficulty_score,
                content,
                new.content.correct_answer as i64,
                new.topic(),
                to_ms(now),
            ],
        )?;
        let id = db.last_insert_rowid();
        let question = db.query_row(
            &format!("SELECT {} FROM questions WHERE id = ?1", QUESTION_COLUMNS),
            [id],
            row_to_question,
        )?;
        Ok(question)
    }

    pub fn get_question(&self, question_id: i64) -> Result<Option<Question>> {
        let db = self.conn()?;
        let question = db
            .query_row(
                &format!("SELECT {} FROM questions WHERE id = ?1", QUESTION_COLUMNS),
                [question_id],
                row_to_question,
            )
            .optional()?;
        Ok(question)
    }

    pub fn set_question_status(&self, question_id: i64, status: QuestionStatus) -> Result<()> {
        let updated = self.conn()?.execute(
            "UPDATE questions SET status = ?1 WHERE id = ?2",
            params![status.as_str(), question_id],
        )?;
        if updated == 0 {
            return Err(QuizError::NotFound(format!("question {}", question_id)));
        }
        Ok(())
    }

    /// Active questions at the user's language/level, restricted to the types they practice.
    pub fn eligible_questions(&self, user: &User) -> Result<Vec<Question>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM questions WHERE language = ?1 AND level = ?2 AND status = 'active' \
             ORDER BY created_at, id",
            QUESTION_COLUMNS
        ))?;
        let questions = stmt
            .query_map(params![user.preferred_language, user.current_level], row_to_question)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(questions.into_iter().filter(|q| user.wants(q.question_type)).collect())
    }

    /// Active questions used at most `max_usage` times, counted per combo.
    pub fn low_usage_counts(&self, max_usage: i64) -> Result<HashMap<Combo, usize>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT language, level, question_type, COUNT(*)
            FROM questions
            WHERE status = 'active' AND usage_count <= ?1
            GROUP BY language, level, question_type
            "#,
        )?;
        let rows = stmt.query_map([max_usage], |row| {
            let raw_type: String = row.get(2)?;
            let combo = Combo::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                parse_question_type(2, &raw_type)?,
            );
            Ok((combo, row.get::<_, i64>(3)? as usize))
        })?;
        let counts = rows.collect::<rusqlite::Result<HashMap<_, _>>>()?;
        Ok(counts)
    }

    pub fn count_questions(&self, combo: &Combo) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM questions WHERE language = ?1 AND level = ?2 AND question_type = ?3",
            params![combo.language, combo.level, combo.question_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
