//! Question generator interface.

use async_trait::async_trait;

use crate::ai::error::AiError;
use crate::config::LengthRange;
use crate::domain::{Combo, QuestionContent, QuestionType};

/// Produces one question for a combo. Implementations do not enforce deadlines;
/// the caller wraps each call in a timeout.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<QuestionContent, AiError>;

    /// Model or provider name, for logs.
    fn name(&self) -> &str;
}

/// Soft guidance for the generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationHints {
    /// Weak or high-priority topics to steer toward
    pub focus_topics: Vec<String>,
    /// Target length for the level
    pub length: Option<LengthRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub language: String,
    pub level: String,
    pub question_type: QuestionType,
    pub hints: GenerationHints,
}

impl GenerationRequest {
    pub fn new(combo: &Combo) -> Self {
        Self {
            language: combo.language.clone(),
            level: combo.level.clone(),
            question_type: combo.question_type,
            hints: GenerationHints::default(),
        }
    }

    pub fn with_length(mut self, length: Option<LengthRange>) -> Self {
        self.hints.length = length;
        self
    }

    pub fn with_focus_topics(mut self, topics: Vec<String>) -> Self {
        self.hints.focus_topics = topics;
        self
    }

    pub fn combo(&self) -> Combo {
        Combo::new(self.language.clone(), self.level.clone(), self.question_type)
    }
}
