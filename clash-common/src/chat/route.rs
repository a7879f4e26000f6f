//! Simple→detailed prompt routing
//!
//! One backend call that both moderates and infers structure: whether the
//! user wants an instrumental piece and whether they asked for a specific
//! duration. Ambiguity errs toward instrumental and toward no duration.

use super::backend::{ChatBackend, ChatRequest};
use super::moderate::MODERATION_RULES;
use super::{parse_verdict, rejection_from, ChatError};
use crate::prompt::{DetailedPrompt, SimplePrompt};
use serde_json::Value;

const ROUTING_RULES: &str = r#"
For prompts that pass moderation, in priority order:

1. Decide whether the user wants an *instrumental-only* piece or one with
   lyrics. When ambiguous, err on the side of instrumental.
2. Decide whether the user asked for a specific *duration*; if so output it
   in seconds, otherwise output null. Unless the user was very specific,
   err on the side of null.
"#;

const ROUTING_FORMAT: &str = r#"
Respond with a valid JSON object only.

For prompts that fail moderation:

{"is_okay": false, "rationale": str, "error_message": str}

For prompts that pass moderation:

{"is_okay": true, "instrumental": bool, "duration": number | null}
"#;

const MAX_TOKENS: u32 = 64;

fn routing_text(prompt: &SimplePrompt) -> String {
    format!(
        "You are a specialized assistant performing two tasks: (1) moderate \
         natural-language prompts for a music generation service, and (2) for \
         prompts that pass moderation, convert them to a structured \
         representation.\n\n{}\n{}\n{}\nInput:\n{}\n\nOutput (JSON only):",
        MODERATION_RULES.trim(),
        ROUTING_RULES.trim(),
        ROUTING_FORMAT.trim(),
        prompt.prompt
    )
}

/// Route a simple prompt into its detailed form.
///
/// Moderation refusal surfaces as [`ChatError::Rejected`]; the returned
/// prompt always satisfies the instrumental/lyrics invariant since routing
/// never emits lyrics.
pub async fn route(
    backend: &dyn ChatBackend,
    prompt: &SimplePrompt,
    seed: Option<u64>,
) -> Result<DetailedPrompt, ChatError> {
    tracing::info!(backend = %backend.id(), "routing prompt");

    let request = ChatRequest::new(routing_text(prompt), MAX_TOKENS)
        .with_seed(seed)
        .force_json();
    let raw = backend.complete(request).await?;
    let verdict = parse_verdict(&raw)?;

    if verdict.get("is_okay").and_then(Value::as_bool) != Some(true) {
        return Err(ChatError::Rejected(rejection_from(&verdict)));
    }

    let instrumental = verdict
        .get("instrumental")
        .and_then(Value::as_bool)
        .ok_or(ChatError::IncompleteJson("instrumental"))?;
    let duration = verdict.get("duration").and_then(Value::as_f64);

    tracing::info!(instrumental, ?duration, "prompt routed");

    Ok(DetailedPrompt {
        overall_prompt: prompt.prompt.clone(),
        instrumental,
        lyrics: None,
        duration,
        bpm: None,
    })
}
