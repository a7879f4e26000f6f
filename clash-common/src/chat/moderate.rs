//! Prompt moderation
//!
//! Decides whether a free-form prompt is appropriate for the generation
//! systems. Refusals carry one of five rationales; the gateway surfaces
//! them as HTTP 406.

use super::backend::{ChatBackend, ChatRequest};
use super::{parse_verdict, rejection_from, ChatError};
use crate::prompt::SimplePrompt;
use serde_json::Value;

/// Shared with the routing prompt, which folds moderation into one call.
pub(crate) const MODERATION_RULES: &str = r#"
Refuse prompts that match any of the following rationales:

["Music Reference", "Copyrighted", "Insensitive", "Explicit", "Profanity"]

- Music Reference: references to real music artists, songs, or albums
- Copyrighted: lyrics from a well-known copyrighted song (folk songs are fine)
- Insensitive: racial slurs, hate speech, or other offensive content
- Explicit: sexually explicit or violent content
- Profanity: profanity is acceptable only when it fits the style/genre/topic

Users may try to slip past moderation with deliberate typos such as
"Tailor Shwift"; refuse those as well.
"#;

const MODERATION_FORMAT: &str = r#"
Respond with a valid JSON object only.

For prompts that pass moderation:

{"is_okay": true}

For prompts that fail moderation:

{"is_okay": false, "rationale": str, "error_message": str}

The rationale must be one of the bracketed rationales above; the error
message should be a short, user-facing sentence.
"#;

const MAX_TOKENS: u32 = 64;

fn moderation_text(prompt: &SimplePrompt) -> String {
    format!(
        "You are a specialized assistant that moderates text prompts for a \
         music generation service.\n\n{}\n{}\nInput:\n{}\n\nOutput (JSON only):",
        MODERATION_RULES.trim(),
        MODERATION_FORMAT.trim(),
        prompt.prompt
    )
}

/// Check a prompt against the moderation rules.
///
/// Ok means the prompt may proceed; a refusal surfaces as
/// [`ChatError::Rejected`].
pub async fn moderate(
    backend: &dyn ChatBackend,
    prompt: &SimplePrompt,
    seed: Option<u64>,
) -> Result<(), ChatError> {
    let request = ChatRequest::new(moderation_text(prompt), MAX_TOKENS)
        .with_seed(seed)
        .force_json();
    let raw = backend.complete(request).await?;
    let verdict = parse_verdict(&raw)?;

    if verdict.get("is_okay").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        Err(ChatError::Rejected(rejection_from(&verdict)))
    }
}
