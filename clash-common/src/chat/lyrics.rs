//! Lyric synthesis
//!
//! Turns a detailed prompt into lyrics for systems that take lyrics as
//! input but do not write their own. Callers should consult
//! `DetailedPrompt::generate_lyrics()` first; systems that write their own
//! lyrics skip this entirely.

use super::backend::{ChatBackend, ChatRequest};
use super::ChatError;
use crate::prompt::DetailedPrompt;

const INSTRUCTION: &str = r#"
The prompt will likely be vague: maybe only a style ("lo-fi beats", "dreamy
synthwave"), maybe only a topic ("a song about a roadtrip with Bob"), maybe
neither or both. Infer:

- topical themes and subject matter, if specified
- style/genre, if unspecified
- emotional tone and atmosphere
- vocabulary and linguistic patterns typical of the style
- the intended language where the style implies one
- typical song structure for the genre
- intended length, if the prompt constrains it

Then write lyrics that feel natural for the prompt, keep a consistent voice
and tone, and suit the style in both language and content.

Guidelines:

- capture the essence of the style without leaning on cliches
- write original lyrics, not derivative of existing songs
- consider rhythm and meter as sung text
- no section labels such as [Verse 1] or [Chorus]
- scale complexity to the style, from minimal ambient to dense rap
- never produce slurs, hate speech, sexually explicit content, or profanity,
  even if the prompt asks for it

Output only the lyrics, nothing else.
"#;

const MAX_TOKENS: u32 = 512;

fn lyrics_text(prompt: &DetailedPrompt) -> String {
    let duration = match prompt.duration {
        Some(d) => format!("{}", d),
        None => "unspecified".to_string(),
    };
    format!(
        "You are a specialized assistant that transforms brief text prompts \
         into song lyrics. The lyrics will be paired with the prompt and fed \
         to a music generation model.\n\n{}\nThe user prompt is:\n\n```\n{}\n```\n\n\
         Target duration in seconds: {}.",
        INSTRUCTION.trim(),
        prompt.overall_prompt,
        duration
    )
}

/// Generate lyrics for a vocal prompt that carries none.
pub async fn generate_lyrics(
    backend: &dyn ChatBackend,
    prompt: &DetailedPrompt,
    seed: Option<u64>,
) -> Result<String, ChatError> {
    if !prompt.generate_lyrics() {
        tracing::warn!("generate_lyrics called for a prompt that does not need lyrics");
    }
    let request = ChatRequest::new(lyrics_text(prompt), MAX_TOKENS).with_seed(seed);
    let raw = backend.complete(request).await?;
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::testing::ScriptedBackend;

    #[tokio::test]
    async fn test_generate_lyrics_trims_output() {
        let backend = ScriptedBackend::new(vec![Ok("\nsalt spray and rolling tide\n\n")]);
        let prompt = DetailedPrompt::new("a ballad about the sea", false, None, None, None).unwrap();
        let lyrics = generate_lyrics(&backend, &prompt, None).await.unwrap();
        assert_eq!(lyrics, "salt spray and rolling tide");
    }

    #[tokio::test]
    async fn test_prompt_text_carries_duration() {
        let prompt =
            DetailedPrompt::new("a ballad about the sea", false, None, Some(45.0), None).unwrap();
        let text = lyrics_text(&prompt);
        assert!(text.contains("45"));
        assert!(text.contains("a ballad about the sea"));
    }
}
