//! Domain types for adaptiq
//!
//! - Question: inventory item plus its generated content
//! - User / UserLearningPreferences: the learner-side inputs to scoring
//! - DailyQuestionAssignment: the per-day selection rows
//! - GenerationHint: short-lived refill requests consumed by the worker
//! - AttemptRecord: outcome of one generation attempt, for operators

pub mod assignment;
pub mod attempt;
pub mod question;
pub mod user;

pub use assignment::{DailyProgress, DailyQuestionAssignment, GenerationHint, QuestionHistoryEntry};
pub use attempt::{AttemptOutcome, AttemptRecord};
pub use question::{Combo, NewQuestion, Question, QuestionContent, QuestionStatus, QuestionType};
pub use user::{PerformanceMetrics, User, UserLearningPreferences, UserQuestionMetadata, UserResponse};
