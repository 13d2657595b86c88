//! OpenAI-compatible chat completions generator.
//!
//! Works against any endpoint that speaks `/chat/completions` (OpenAI, local
//! gateways). Status mapping: 429 -> RateLimited, 5xx -> retryable Api error,
//! 400/401/403/404/422 -> config-class Api error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::ai::client::{GenerationRequest, QuestionGenerator};
use crate::ai::error::AiError;
use crate::ai::parse::parse_question_content;
use crate::config::AiConfig;
use crate::domain::{QuestionContent, QuestionType};

const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Connection settings for the generator
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self::from(&AiConfig::default())
    }
}

impl From<&AiConfig> for OpenAiConfig {
    fn from(config: &AiConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl OpenAiConfig {
    pub fn with_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }
}

pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    config: OpenAiConfig,
}

impl OpenAiGenerator {
    /// Build a generator, reading the API key from the configured environment variable.
    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| AiError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, OpenAiConfig::from(config))
    }

    pub fn with_api_key(api_key: String, config: OpenAiConfig) -> Result<Self, AiError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn build_prompt(request: &GenerationRequest) -> String {
        let mut prompt = format!(
            "Write one multiple-choice {} question in {} for a learner at CEFR level {}.\n",
            describe_type(request.question_type),
            request.language,
            request.level
        );
        if let Some(length) = request.hints.length {
            let target = if request.question_type == QuestionType::ReadingComprehension {
                "passage"
            } else {
                "question"
            };
            prompt.push_str(&format!(
                "Keep the {} between {} and {} words.\n",
                target, length.min_words, length.max_words
            ));
        }
        if !request.hints.focus_topics.is_empty() {
            prompt.push_str(&format!("Prefer these topics: {}.\n", request.hints.focus_topics.join(", ")));
        }
        prompt.push_str(
            "Respond with JSON only: {\"question\": string, \"options\": [4 distinct strings], \
             \"correct_answer\": index 0-3, \"explanation\": string, \"topic\": string",
        );
        if request.question_type == QuestionType::ReadingComprehension {
            prompt.push_str(", \"passage\": string");
        }
        prompt.push('}');
        prompt
    }

    fn build_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "response_format": { "type": "json_object" },
            "messages": [
                {
                    "role": "system",
                    "content": "You write language-learning quiz questions and answer with a single JSON object."
                },
                { "role": "user", "content": Self::build_prompt(request) }
            ]
        })
    }

    fn extract_text(body: &Value) -> Result<&str, AiError> {
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| AiError::Malformed("response has no message content".to_string()))
    }

    async fn send_request(&self, body: Value) -> Result<Value, AiError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(AiError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AiError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

fn describe_type(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::Vocabulary => "vocabulary (meaning of a word used in a short sentence)",
        QuestionType::FillBlank => "fill-in-the-blank (one missing word marked ___)",
        QuestionType::Qa => "question-and-answer",
        QuestionType::ReadingComprehension => "reading comprehension (short passage followed by a question)",
    }
}

#[async_trait]
impl QuestionGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<QuestionContent, AiError> {
        let body = self.build_request(request);
        let response = self.send_request(body).await?;
        let text = Self::extract_text(&response)?;
        parse_question_content(text, request.question_type)
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}
