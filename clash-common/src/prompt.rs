//! Text-to-music prompts
//!
//! `SimplePrompt` is the free-form text a user types. `DetailedPrompt` is
//! the structured form workers consume: either derived by the routing
//! pipeline or supplied directly (prebaked/detailed requests). Both carry a
//! content checksum over their non-null fields, used for prebaked lookup
//! and object-store key construction.

use crate::checksum::json_checksum;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Free-form user prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplePrompt {
    pub prompt: String,
}

impl SimplePrompt {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            prompt: text.into(),
        }
    }

    /// Content checksum over non-null fields.
    pub fn checksum(&self) -> String {
        prompt_checksum(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Structured prompt consumed by generator workers.
///
/// Invariant: an instrumental prompt carries no lyrics. Enforced by
/// [`DetailedPrompt::new`] and by deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DetailedPromptRaw")]
pub struct DetailedPrompt {
    pub overall_prompt: String,
    pub instrumental: bool,
    pub lyrics: Option<String>,
    pub duration: Option<f64>,
    pub bpm: Option<f64>,
}

impl DetailedPrompt {
    pub fn new(
        overall_prompt: impl Into<String>,
        instrumental: bool,
        lyrics: Option<String>,
        duration: Option<f64>,
        bpm: Option<f64>,
    ) -> Result<Self> {
        if instrumental && lyrics.is_some() {
            return Err(Error::InvalidInput(
                "lyrics must be null for instrumental prompts".to_string(),
            ));
        }
        Ok(Self {
            overall_prompt: overall_prompt.into(),
            instrumental,
            lyrics,
            duration,
            bpm,
        })
    }

    /// Whether the platform should synthesize lyrics for this prompt.
    ///
    /// True exactly when the prompt is vocal and no lyrics were supplied;
    /// some systems generate their own lyrics and never consult this.
    pub fn generate_lyrics(&self) -> bool {
        !self.instrumental && self.lyrics.is_none()
    }

    /// Content checksum over non-null fields.
    pub fn checksum(&self) -> String {
        prompt_checksum(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

// Deserialization goes through the raw mirror so the invariant holds for
// wire input as well as for constructed values.
#[derive(Deserialize)]
struct DetailedPromptRaw {
    overall_prompt: String,
    instrumental: bool,
    #[serde(default)]
    lyrics: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    bpm: Option<f64>,
}

impl TryFrom<DetailedPromptRaw> for DetailedPrompt {
    type Error = Error;

    fn try_from(raw: DetailedPromptRaw) -> Result<Self> {
        DetailedPrompt::new(
            raw.overall_prompt,
            raw.instrumental,
            raw.lyrics,
            raw.duration,
            raw.bpm,
        )
    }
}

// Checksum over the non-null top-level fields of a serialized prompt.
fn prompt_checksum(value: Value) -> String {
    let filtered = match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
        ),
        other => other,
    };
    json_checksum(&filtered)
}
