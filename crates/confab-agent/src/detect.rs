//! LLM-based language detection for users without a stored preference.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use confab_providers::{ChatMessage, ChatPrompt, ProviderMux};

/// Confidence at or above which the detected language is saved without
/// asking the user.
pub const AUTO_SAVE_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageDetection {
    pub language: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

const DETECT_SYSTEM: &str = "You are a language detection service. Reply with ONLY a JSON \
object of the form {\"language\": \"<language name in English>\", \"confidence\": 0.0-1.0, \
\"reasoning\": \"<short reason>\"}. If unsure, set confidence below 0.7. No other text.";

/// Ask the configured LLM which language `text` is written in.
/// Returns `None` when the call fails or the reply is unparseable; the
/// caller then proceeds without a detection.
pub async fn detect_language(
    mux: &ProviderMux,
    text: &str,
    provider_pref: Option<&str>,
    cancel: Option<&CancellationToken>,
) -> Option<LanguageDetection> {
    let prompt = ChatPrompt {
        system: DETECT_SYSTEM.to_string(),
        messages: vec![ChatMessage::user(format!("Detect the language: {text}"))],
        tools: Vec::new(),
    };

    let reply = match mux.chat(&prompt, provider_pref, None, cancel).await {
        Ok(out) => out.response.content,
        Err(e) => {
            warn!(err = %e, "language detection call failed");
            return None;
        }
    };

    let parsed = extract_json(&reply)?;
    match serde_json::from_str::<LanguageDetection>(&parsed) {
        Ok(detection) if !detection.language.trim().is_empty() => {
            debug!(
                language = %detection.language,
                confidence = detection.confidence,
                "language detected"
            );
            Some(detection)
        }
        Ok(_) => None,
        Err(e) => {
            warn!(err = %e, "language detection reply unparseable");
            None
        }
    }
}

/// Confirmation question used when confidence is below the threshold.
/// Asked in both the detected language's name and English so the user can
/// answer either way.
pub fn confirmation_message(language: &str) -> String {
    format!(
        "It looks like you might be writing in {language}. Should I continue in \
         {language}? Please confirm, or tell me your preferred language."
    )
}

fn extract_json(reply: &str) -> Option<String> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end > start {
        Some(reply[start..=end].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_noisy_reply() {
        let reply = "Sure! {\"language\": \"German\", \"confidence\": 0.95, \
                     \"reasoning\": \"umlauts\"} hope that helps";
        let json = extract_json(reply).unwrap();
        let parsed: LanguageDetection = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.language, "German");
        assert!(parsed.confidence >= AUTO_SAVE_THRESHOLD);
    }

    #[test]
    fn confirmation_names_the_language() {
        let msg = confirmation_message("Spanish");
        assert!(msg.contains("Spanish"));
        assert!(msg.contains("confirm"));
    }
}
