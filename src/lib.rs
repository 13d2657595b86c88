//! adaptiq - adaptive question scheduling and generation admission control
//!
//! The core of a language-learning quiz backend: per-user priority scoring,
//! idempotent daily question sets, a fail-fast admission gate for AI calls,
//! and a background worker that keeps question inventory stocked.

pub mod admission;
pub mod ai;
pub mod config;
pub mod daily;
pub mod domain;
pub mod error;
pub mod hints;
pub mod scoring;
pub mod store;
pub mod worker;

pub use error::{QuizError, Result};
