//! SQLite-backed persistence for the scheduling core.
//!
//! `QuizStore` owns a single `rusqlite::Connection` behind a `Mutex`, which makes
//! it `Send + Sync` so the scorer, selector and worker can share one `Arc<QuizStore>`.
//! Each table group lives in its own file as an `impl QuizStore` block:
//!
//! - `users`: users, preferences, metadata, responses, performance rollups
//! - `questions`: question inventory
//! - `scores`: per (user, question) priority scores
//! - `assignments`: daily assignment rows
//! - `hints`: generation hints
//! - `worker_state`: pause flags and generation attempt history
//!
//! # Example
//!
//! ```ignore
//! use adaptiq::store::QuizStore;
//!
//! let store = QuizStore::open_at(Path::new("/tmp/adaptiq.db"))?;
//! let user = store.get_user(7)?;
//! ```

mod assignments;
mod hints;
mod questions;
mod scores;
mod users;
mod worker_state;

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;

use crate::error::{QuizError, Result};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shared handle to the quiz database.
pub struct QuizStore {
    db: Mutex<Connection>,
}

impl std::fmt::Debug for QuizStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizStore").finish_non_exhaustive()
    }
}

impl QuizStore {
    /// Open or create a store at the given database file.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(db_path)?;
        db.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(db)
    }

    /// In-memory store, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                preferred_language TEXT NOT NULL,
                current_level TEXT NOT NULL,
                utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
                question_types TEXT NOT NULL DEFAULT '[]',
                ai_enabled INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS questions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question_type TEXT NOT NULL,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                difficulty_score REAL NOT NULL DEFAULT 0.5,
                content TEXT NOT NULL,
                correct_answer INTEGER NOT NULL,
                topic TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                usage_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_questions_combo
                ON questions(language, level, question_type, status);

            CREATE TABLE IF NOT EXISTS user_responses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                is_correct INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_responses_user_question
                ON user_responses(user_id, question_id);

            CREATE TABLE IF NOT EXISTS user_question_metadata (
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                marked_as_known INTEGER NOT NULL DEFAULT 0,
                confidence_level INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS question_priority_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                priority_score REAL NOT NULL,
                last_calculated_at INTEGER NOT NULL,
                UNIQUE (user_id, question_id)
            );

            CREATE TABLE IF NOT EXISTS user_learning_preferences (
                user_id INTEGER PRIMARY KEY REFERENCES users(id),
                focus_on_weak_areas INTEGER NOT NULL,
                fresh_question_ratio REAL NOT NULL,
                known_question_penalty REAL NOT NULL,
                review_interval_days INTEGER NOT NULL,
                weak_area_boost REAL NOT NULL,
                daily_goal INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS daily_question_assignments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                question_id INTEGER NOT NULL REFERENCES questions(id),
                assignment_date TEXT NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                completed_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE (user_id, question_id, assignment_date)
            );
            CREATE INDEX IF NOT EXISTS idx_assignments_user_date
                ON daily_question_assignments(user_id, assignment_date);

            CREATE TABLE IF NOT EXISTS generation_hints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                question_type TEXT NOT NULL,
                priority_weight INTEGER NOT NULL DEFAULT 1,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, language, level, question_type)
            );
            CREATE INDEX IF NOT EXISTS idx_hints_expiry ON generation_hints(expires_at);

            CREATE TABLE IF NOT EXISTS performance_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                topic TEXT NOT NULL,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                total_attempts INTEGER NOT NULL DEFAULT 0,
                correct_attempts INTEGER NOT NULL DEFAULT 0,
                average_response_time_ms REAL NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                UNIQUE (user_id, topic, language, level)
            );

            CREATE TABLE IF NOT EXISTS worker_flags (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS paused_users (
                user_id INTEGER PRIMARY KEY,
                paused_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS generation_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                language TEXT NOT NULL,
                level TEXT NOT NULL,
                question_type TEXT NOT NULL,
                subject TEXT NOT NULL,
                outcome TEXT NOT NULL,
                error_class TEXT,
                error_message TEXT,
                question_id INTEGER,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_attempts_finished ON generation_attempts(finished_at);
            "#,
        )?;

        Ok(())
    }

    /// Lock the connection; a poisoned lock surfaces as a storage error.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(QuizError::poisoned)
    }
}

/// Unix milliseconds for a UTC timestamp.
pub fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// UTC timestamp from unix milliseconds; out-of-range values collapse to the epoch.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Map a bad text column into a rusqlite conversion error so row mappers can use `?`.
pub(crate) fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::<dyn std::error::Error + Send + Sync>::from(message),
    )
}

pub(crate) fn parse_date(column: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| conversion_error(column, format!("bad date {:?}: {}", raw, e)))
}

pub(crate) fn parse_question_type(column: usize, raw: &str) -> rusqlite::Result<crate::domain::QuestionType> {
    crate::domain::QuestionType::parse(raw)
        .ok_or_else(|| conversion_error(column, format!("unknown question type {:?}", raw)))
}
