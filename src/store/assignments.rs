//! Daily assignment rows. The (user, question, date) unique key plus the day-level
//! check in `insert_daily_set` keep racing writers from duplicating or mixing a day's set.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Row, TransactionBehavior, params};

use super::{QuizStore, fmt_date, from_ms, parse_date, to_ms};
use crate::domain::DailyQuestionAssignment;
use crate::error::Result;

fn row_to_assignment(row: &Row<'_>) -> rusqlite::Result<DailyQuestionAssignment> {
    let raw_date: String = row.get(3)?;
    let completed_at: Option<i64> = row.get(5)?;
    Ok(DailyQuestionAssignment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        question_id: row.get(2)?,
        assignment_date: parse_date(3, &raw_date)?,
        is_completed: row.get(4)?,
        completed_at: completed_at.map(from_ms),
        created_at: from_ms(row.get(6)?),
    })
}

impl QuizStore {
    pub fn assignments_for(&self, user_id: i64, date: NaiveDate) -> Result<Vec<DailyQuestionAssignment>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, user_id, question_id, assignment_date, is_completed, completed_at, created_at
            FROM daily_question_assignments
            WHERE user_id = ?1 AND assignment_date = ?2
            ORDER BY id
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, fmt_date(date)], row_to_assignment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Every question ever assigned to the user, on any date.
    pub fn assigned_question_ids(&self, user_id: i64) -> Result<HashSet<i64>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT DISTINCT question_id FROM daily_question_assignments WHERE user_id = ?1")?;
        let ids = stmt
            .query_map([user_id], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Insert the day's selection in one immediate transaction. When the day already
    /// has rows (another writer got there first) nothing is inserted. Individual
    /// duplicates are ignored by the unique key. Returns how many rows this call created.
    pub fn insert_daily_set(
        &self,
        user_id: i64,
        date: NaiveDate,
        question_ids: &[i64],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut db = self.conn()?;
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let date = fmt_date(date);
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM daily_question_assignments WHERE user_id = ?1 AND assignment_date = ?2",
            params![user_id, date],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(0);
        }

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO daily_question_assignments (user_id, question_id, assignment_date, created_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(user_id, question_id, assignment_date) DO NOTHING
                "#,
            )?;
            for question_id in question_ids {
                inserted += stmt.execute(params![user_id, question_id, date, to_ms(now)])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Set or clear the completion flag. Returns false when no such assignment exists.
    pub fn set_assignment_completed(
        &self,
        user_id: i64,
        question_id: i64,
        date: NaiveDate,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let completed_at = if completed { Some(to_ms(now)) } else { None };
        let updated = self.conn()?.execute(
            r#"
            UPDATE daily_question_assignments
            SET is_completed = ?1, completed_at = ?2
            WHERE user_id = ?3 AND question_id = ?4 AND assignment_date = ?5
            "#,
            params![completed, completed_at, user_id, question_id, fmt_date(date)],
        )?;
        Ok(updated > 0)
    }

    /// (completed, total) for one user and date.
    pub fn assignment_counts(&self, user_id: i64, date: NaiveDate) -> Result<(usize, usize)> {
        let (completed, total): (i64, i64) = self.conn()?.query_row(
            r#"
            SELECT COALESCE(SUM(is_completed), 0), COUNT(*)
            FROM daily_question_assignments
            WHERE user_id = ?1 AND assignment_date = ?2
            "#,
            params![user_id, fmt_date(date)],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((completed as usize, total as usize))
    }

    /// Assignments of one question to the user on or after `since`, oldest first.
    pub fn question_assignments_since(
        &self,
        user_id: i64,
        question_id: i64,
        since: NaiveDate,
    ) -> Result<Vec<DailyQuestionAssignment>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            r#"
            SELECT id, user_id, question_id, assignment_date, is_completed, completed_at, created_at
            FROM daily_question_assignments
            WHERE user_id = ?1 AND question_id = ?2 AND assignment_date >= ?3
            ORDER BY assignment_date
            "#,
        )?;
        let rows = stmt
            .query_map(params![user_id, question_id, fmt_date(since)], row_to_assignment)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Dates with at least one assignment, newest first.
    pub fn assignment_dates(&self, user_id: i64) -> Result<Vec<NaiveDate>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT DISTINCT assignment_date FROM daily_question_assignments WHERE user_id = ?1 \
             ORDER BY assignment_date DESC",
        )?;
        let dates = stmt
            .query_map([user_id], |row| {
                let raw: String = row.get(0)?;
                parse_date(0, &raw)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(dates)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_question, add_user, store};
    use super::*;
    use crate::domain::QuestionType;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = store();
        add_user(&store, 1);
        let a = add_question(&store, QuestionType::Vocabulary, Utc::now());
        let b = add_question(&store, QuestionType::Vocabulary, Utc::now());

        assert_eq!(store.insert_daily_set(1, day(4), &[a.id, b.id, a.id], Utc::now()).unwrap(), 2);
        assert_eq!(store.insert_daily_set(1, day(4), &[a.id, b.id], Utc::now()).unwrap(), 0);
        assert_eq!(store.assignments_for(1, day(4)).unwrap().len(), 2);

        store.insert_daily_set(1, day(5), &[a.id], Utc::now()).unwrap();
        assert_eq!(store.assigned_question_ids(1).unwrap().len(), 2);
        assert_eq!(store.assignment_dates(1).unwrap(), vec![day(5), day(4)]);
    }

    #[test]
    fn test_completion_flag() {
        let store = store();
        add_user(&store, 1);
        let a = add_question(&store, QuestionType::Vocabulary, Utc::now());
        store.insert_daily_set(1, day(4), &[a.id], Utc::now()).unwrap();

        assert!(store.set_assignment_completed(1, a.id, day(4), true, Utc::now()).unwrap());
        let rows = store.assignments_for(1, day(4)).unwrap();
        assert!(rows[0].is_completed);
        assert!(rows[0].completed_at.is_some());
        assert_eq!(store.assignment_counts(1, day(4)).unwrap(), (1, 1));

        assert!(store.set_assignment_completed(1, a.id, day(4), false, Utc::now()).unwrap());
        assert!(store.assignments_for(1, day(4)).unwrap()[0].completed_at.is_none());
        assert!(!store.set_assignment_completed(1, a.id, day(9), true, Utc::now()).unwrap());
    }

    #[test]
    fn test_second_writer_is_ignored() {
        let store = store();
        add_user(&store, 1);
        let a = add_question(&store, QuestionType::Vocabulary, Utc::now());
        let b = add_question(&store, QuestionType::Vocabulary, Utc::now());

        store.insert_daily_set(1, day(4), &[a.id], Utc::now()).unwrap();
        assert_eq!(store.insert_daily_set(1, day(4), &[b.id], Utc::now()).unwrap(), 0);
        let rows = store.assignments_for(1, day(4)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].question_id, a.id);
    }

    #[test]
    fn test_counts_empty_day() {
        let store = store();
        add_user(&store, 1);
        assert_eq!(store.assignment_counts(1, day(1)).unwrap(), (0, 0));
    }
}
