//! Provider response validation.
//!
//! Raw model text goes through: strip code fences -> JSON -> fixed schema check.
//! Anything that fails becomes `AiError::Malformed` and never reaches the store.

use serde::Deserialize;
use serde_json::Value;

use crate::ai::error::AiError;
use crate::domain::{QuestionContent, QuestionType};

pub const REQUIRED_OPTIONS: usize = 4;

/// Remove a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // drop the language tag line, e.g. ```json
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    question: Option<String>,
    options: Option<Vec<String>>,
    correct_answer: Option<Value>,
    explanation: Option<String>,
    passage: Option<String>,
    topic: Option<String>,
}

fn malformed(msg: impl Into<String>) -> AiError {
    AiError::Malformed(msg.into())
}

/// Pick the single question object out of the shapes models tend to return:
/// a bare object, a one-element array, or `{"questions": [...]}`.
fn unwrap_question(value: Value) -> Result<Value, AiError> {
    match value {
        Value::Array(mut items) => {
            if items.is_empty() {
                return Err(malformed("empty question array"));
            }
            Ok(items.swap_remove(0))
        }
        Value::Object(mut map) => match map.remove("questions") {
            Some(inner) => unwrap_question(inner),
            None => Ok(Value::Object(map)),
        },
        other => Err(malformed(format!("expected a JSON object, got {}", other))),
    }
}

/// Correct answer as an option index; also accepts the option text itself.
fn resolve_correct_answer(value: &Value, options: &[String]) -> Result<usize, AiError> {
    let index = match value {
        Value::Number(n) => n
            .as_u64()
            .map(|i| i as usize)
            .ok_or_else(|| malformed(format!("correct_answer {} is not a valid index", n)))?,
        Value::String(text) => match text.trim().parse::<usize>() {
            Ok(i) => i,
            Err(_) => options
                .iter()
                .position(|o| o.trim() == text.trim())
                .ok_or_else(|| malformed(format!("correct_answer {:?} not found in options", text)))?,
        },
        other => return Err(malformed(format!("unsupported correct_answer {}", other))),
    };
    if index >= options.len() {
        return Err(malformed(format!(
            "correct_answer index {} out of range (0-{})",
            index,
            options.len().saturating_sub(1)
        )));
    }
    Ok(index)
}

fn non_empty(field: Option<String>) -> Option<String> {
    field.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Validate a parsed object against the question schema.
pub fn validate_question(value: Value, question_type: QuestionType) -> Result<QuestionContent, AiError> {
    let raw: RawQuestion =
        serde_json::from_value(unwrap_question(value)?).map_err(|e| malformed(format!("schema mismatch: {}", e)))?;

    let question = non_empty(raw.question).ok_or_else(|| malformed("missing question text"))?;

    let options: Vec<String> = raw
        .options
        .ok_or_else(|| malformed("missing options"))?
        .into_iter()
        .map(|o| o.trim().to_string())
        .collect();
    if options.len() != REQUIRED_OPTIONS {
        return Err(malformed(format!(
            "expected {} options, got {}",
            REQUIRED_OPTIONS,
            options.len()
        )));
    }
    if options.iter().any(|o| o.is_empty()) {
        return Err(malformed("empty option"));
    }
    let mut seen: Vec<&str> = Vec::with_capacity(options.len());
    for option in &options {
        let key = option.as_str();
        if seen.iter().any(|s| s.eq_ignore_ascii_case(key)) {
            return Err(malformed(format!("duplicate option {:?}", option)));
        }
        seen.push(key);
    }

    let correct_answer = resolve_correct_answer(
        raw.correct_answer.as_ref().ok_or_else(|| malformed("missing correct_answer"))?,
        &options,
    )?;

    let passage = non_empty(raw.passage);
    if question_type == QuestionType::ReadingComprehension && passage.is_none() {
        return Err(malformed("reading_comprehension requires a passage"));
    }

    Ok(QuestionContent {
        question,
        options,
        correct_answer,
        explanation: non_empty(raw.explanation),
        passage,
        topic: non_empty(raw.topic),
    })
}

/// Full pipeline from provider text to validated content.
pub fn parse_question_content(raw: &str, question_type: QuestionType) -> Result<QuestionContent, AiError> {
    let body = strip_code_fences(raw);
    let value: Value = serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
    validate_question(value, question_type)
}
