//! Chat-backed prompt pipeline
//!
//! Three independent async operations against a pluggable chat backend:
//! moderation, simple→detailed routing, and lyric synthesis. All are pure
//! transformations; nothing here persists state. Backend output is treated
//! as best-effort JSON (force-JSON mode where the provider supports it).

pub mod backend;
pub mod lyrics;
pub mod moderate;
pub mod route;

pub use backend::{resolve_backend, ChatBackend, ChatRequest, OpenAiBackend};
pub use lyrics::generate_lyrics;
pub use moderate::moderate;
pub use route::route;

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Why a prompt was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rationale {
    MusicReference,
    Copyrighted,
    Insensitive,
    Explicit,
    Profanity,
    /// Backend produced a rationale outside the known set; preserved
    /// verbatim rather than dropping the refusal.
    Other(String),
}

impl Rationale {
    /// Lenient parse: accepts both spaced and compact spellings.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace([' ', '_', '-'], "").as_str() {
            "musicreference" => Rationale::MusicReference,
            "copyrighted" => Rationale::Copyrighted,
            "insensitive" => Rationale::Insensitive,
            "explicit" => Rationale::Explicit,
            "profanity" => Rationale::Profanity,
            _ => Rationale::Other(s.trim().to_string()),
        }
    }
}

impl fmt::Display for Rationale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rationale::MusicReference => f.write_str("Music Reference"),
            Rationale::Copyrighted => f.write_str("Copyrighted"),
            Rationale::Insensitive => f.write_str("Insensitive"),
            Rationale::Explicit => f.write_str("Explicit"),
            Rationale::Profanity => f.write_str("Profanity"),
            Rationale::Other(s) => f.write_str(s),
        }
    }
}

/// Moderation refusal carried as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRejection {
    pub rationale: Rationale,
    pub message: Option<String>,
}

impl fmt::Display for PromptRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.rationale.fmt(f)
    }
}

/// Errors from the prompt pipeline.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport or provider failure.
    #[error("chat backend request failed: {0}")]
    Backend(String),

    /// Output was not parseable JSON.
    #[error("chat backend returned invalid JSON")]
    InvalidJson,

    /// Output was JSON but missing a required key.
    #[error("chat backend returned incomplete JSON: missing '{0}'")]
    IncompleteJson(&'static str),

    /// The prompt failed moderation.
    #[error("prompt rejected: {0}")]
    Rejected(PromptRejection),
}

// Shared verdict parsing for moderate and route: both expect a JSON object
// with an `is_okay` bool and, on refusal, optional rationale fields.
pub(crate) fn parse_verdict(raw: &str) -> Result<Value, ChatError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|_| ChatError::InvalidJson)?;
    if value.get("is_okay").and_then(Value::as_bool).is_none() {
        return Err(ChatError::IncompleteJson("is_okay"));
    }
    Ok(value)
}

pub(crate) fn rejection_from(value: &Value) -> PromptRejection {
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .map(Rationale::parse)
        .unwrap_or_else(|| Rationale::Other("Rejected".to_string()));
    let message = value
        .get("error_message")
        .and_then(Value::as_str)
        .map(str::to_string);
    PromptRejection { rationale, message }
}
