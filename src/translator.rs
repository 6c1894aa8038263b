//! Fallback machine-translation client.
//!
//! Used two ways: to seed an attempt with a pre-translation hint, and to
//! serve the model's `get_translation` tool calls. Failures here are never
//! fatal; every path collapses to `None` so the caller can fold the failure
//! into the conversation instead of aborting the attempt.

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Supported target languages: (code, english name). Lookups accept either
/// form, case-insensitively.
const LANGUAGES: &[(&str, &str)] = &[
    ("ar", "arabic"),
    ("bg", "bulgarian"),
    ("cs", "czech"),
    ("da", "danish"),
    ("de", "german"),
    ("el", "greek"),
    ("en", "english"),
    ("es", "spanish"),
    ("fi", "finnish"),
    ("fr", "french"),
    ("he", "hebrew"),
    ("hi", "hindi"),
    ("hr", "croatian"),
    ("hu", "hungarian"),
    ("id", "indonesian"),
    ("it", "italian"),
    ("ja", "japanese"),
    ("ko", "korean"),
    ("nl", "dutch"),
    ("no", "norwegian"),
    ("pl", "polish"),
    ("pt", "portuguese"),
    ("ro", "romanian"),
    ("ru", "russian"),
    ("sk", "slovak"),
    ("sr", "serbian"),
    ("sv", "swedish"),
    ("th", "thai"),
    ("tr", "turkish"),
    ("uk", "ukrainian"),
    ("vi", "vietnamese"),
    ("zh-cn", "chinese (simplified)"),
    ("zh-tw", "chinese (traditional)"),
];

/// A completed fallback translation.
#[derive(Debug, Clone)]
pub struct Translated {
    pub text: String,
    pub source_lang: String,
    pub dest_lang: String,
}

/// Wire format of the translate endpoint.
#[derive(Debug, Deserialize)]
struct TranslateResponse {
    text: String,
    language: TranslateLanguages,
}

#[derive(Debug, Deserialize)]
struct TranslateLanguages {
    original: String,
    result: String,
}

pub struct TranslateManager {
    client: reqwest::Client,
    endpoint: String,
}

impl TranslateManager {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// Map a human-readable language name (or a language code) to a
    /// supported language code. Returns `None` for unsupported languages.
    pub fn resolve_language(&self, language: &str) -> Option<&'static str> {
        let mut wanted = language.trim().to_lowercase();
        if wanted == "chinese" {
            wanted = "chinese (simplified)".to_string();
        }
        LANGUAGES
            .iter()
            .find(|(code, name)| wanted == *code || wanted == *name)
            .map(|(code, _)| *code)
    }

    /// Translate `text` to the named target language.
    ///
    /// Returns `None` when the language is unsupported or the endpoint
    /// fails in any way.
    pub async fn translate(&self, text: &str, target_language: &str) -> Option<Translated> {
        let code = self.resolve_language(target_language)?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("text", text), ("result_language_code", code)])
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("Translate endpoint returned status {}", r.status());
                return None;
            }
            Err(e) => {
                debug!("Translate request failed: {}", e);
                return None;
            }
        };

        match response.json::<TranslateResponse>().await {
            Ok(body) => Some(Translated {
                text: body.text,
                source_lang: body.language.original,
                dest_lang: body.language.result,
            }),
            Err(e) => {
                debug!("Translate response failed to parse: {}", e);
                None
            }
        }
    }
}
