//! Scripted generator for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::client::{GenerationRequest, QuestionGenerator};
use crate::ai::error::AiError;
use crate::domain::{QuestionContent, QuestionType};

/// Returns scripted results in order, then falls back to a valid canned question.
#[derive(Debug, Default)]
pub struct MockQuestionGenerator {
    script: Mutex<VecDeque<Result<QuestionContent, AiError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockQuestionGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, content: QuestionContent) {
        self.push(Ok(content));
    }

    pub fn push_err(&self, err: AiError) {
        self.push(Err(err));
    }

    fn push(&self, result: Result<QuestionContent, AiError>) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// A valid question for the type; reading comprehension gets a passage.
    pub fn sample_content(question_type: QuestionType, n: usize) -> QuestionContent {
        QuestionContent {
            question: format!("Sample {} question #{}", question_type, n),
            options: vec!["alpha".into(), "beta".into(), "gamma".into(), "delta".into()],
            correct_answer: n % 4,
            explanation: Some("canned".to_string()),
            passage: (question_type == QuestionType::ReadingComprehension)
                .then(|| "Una breve storia su un gatto.".to_string()),
            topic: Some("general".to_string()),
        }
    }
}

#[async_trait]
impl QuestionGenerator for MockQuestionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<QuestionContent, AiError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        scripted.unwrap_or_else(|| Ok(Self::sample_content(request.question_type, n)))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Combo;

    #[tokio::test]
    async fn test_scripted_then_fallback() {
        let mock = MockQuestionGenerator::new();
        mock.push_err(AiError::Malformed("bad".to_string()));
        let request = GenerationRequest::new(&Combo::new("italian", "A1", QuestionType::Qa));

        assert!(mock.generate(&request).await.is_err());
        let content = mock.generate(&request).await.unwrap();
        assert_eq!(content.options.len(), 4);
        assert_eq!(mock.calls(), 2);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_reading_sample_has_passage() {
        let mock = MockQuestionGenerator::new();
        let request = GenerationRequest::new(&Combo::new("italian", "A1", QuestionType::ReadingComprehension));
        assert!(mock.generate(&request).await.unwrap().passage.is_some());
    }
}
