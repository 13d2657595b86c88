//! Question generation provider interface.
//!
//! - `QuestionGenerator`: async trait the worker calls, one question per call
//! - `OpenAiGenerator`: chat-completions implementation over reqwest
//! - `MockQuestionGenerator`: scripted implementation for tests
//! - `parse`: turns provider text into validated `QuestionContent`

pub mod client;
pub mod error;
pub mod mock;
pub mod openai;
pub mod parse;

pub use client::{GenerationHints, GenerationRequest, QuestionGenerator};
pub use error::{AiError, ErrorClass};
pub use mock::MockQuestionGenerator;
pub use openai::{OpenAiConfig, OpenAiGenerator};
pub use parse::{parse_question_content, strip_code_fences};
