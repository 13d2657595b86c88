//! Question inventory types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of question a combo is stocked with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Vocabulary,
    FillBlank,
    Qa,
    ReadingComprehension,
}

impl QuestionType {
    pub const ALL: &'static [QuestionType] = &[
        QuestionType::Vocabulary,
        QuestionType::FillBlank,
        QuestionType::Qa,
        QuestionType::ReadingComprehension,
    ];

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::Vocabulary => "vocabulary",
            QuestionType::FillBlank => "fill_blank",
            QuestionType::Qa => "qa",
            QuestionType::ReadingComprehension => "reading_comprehension",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "vocabulary" => Some(QuestionType::Vocabulary),
            "fill_blank" => Some(QuestionType::FillBlank),
            "qa" => Some(QuestionType::Qa),
            "reading_comprehension" => Some(QuestionType::ReadingComprehension),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown question type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    /// Eligible for assignment
    Active,
    /// Flagged by a learner, kept out of new assignments
    Reported,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Active => "active",
            QuestionStatus::Reported => "reported",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(QuestionStatus::Active),
            "reported" => Some(QuestionStatus::Reported),
            _ => None,
        }
    }
}

impl std::fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generated question body, validated before it becomes a `Question`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionContent {
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub passage: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

/// (language, level, type) tuple the worker keeps stocked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Combo {
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
}

impl Combo {
    pub fn new(language: impl Into<String>, level: impl Into<String>, question_type: QuestionType) -> Self {
        Self {
            language: language.into(),
            level: level.into(),
            question_type,
        }
    }
}

impl std::fmt::Display for Combo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.language, self.level, self.question_type)
    }
}

/// A stored question. Content is immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: i64,
    pub question_type: QuestionType,
    pub language: String,
    pub level: String,
    pub difficulty_score: f64,
    pub content: QuestionContent,
    pub correct_answer: usize,
    pub topic: Option<String>,
    pub status: QuestionStatus,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

impl Question {
    pub fn combo(&self) -> Combo {
        Combo::new(self.language.clone(), self.level.clone(), self.question_type)
    }
}

/// Input for inserting a question; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewQuestion {
    pub combo: Combo,
    pub difficulty_score: f64,
    pub content: QuestionContent,
}

impl NewQuestion {
    pub fn new(combo: Combo, difficulty_score: f64, content: QuestionContent) -> Self {
        Self {
            combo,
            difficulty_score,
            content,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.content.topic.as_deref()
    }
}
