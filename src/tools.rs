//! The `get_translation` function exposed to the model, and its dispatch.
//!
//! Tool-call failures are recoverable conversation content, not attempt
//! failures: every validation stage here maps to a function/system turn
//! that steers the next model turn.

use crate::translator::TranslateManager;
use serde_json::Value;

/// Name of the single function the model may call.
pub const TRANSLATE_FUNCTION: &str = "get_translation";

/// JSON schema advertised to the model when function calling is enabled.
pub fn function_schemas() -> Value {
    serde_json::json!([
        {
            "name": TRANSLATE_FUNCTION,
            "description": "Translate text to another language",
            "parameters": {
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "the text to translate"
                    },
                    "to_language": {
                        "type": "string",
                        "description": "the target language to translate to"
                    }
                },
                "required": ["message", "to_language"]
            }
        }
    ])
}

/// Validated `get_translation` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateArgs {
    pub message: String,
    pub to_language: String,
}

/// Why an argument payload was rejected. The two stages produce different
/// feedback messages in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgError {
    /// The payload was not valid JSON.
    Unparseable,
    /// The payload parsed but a required field was absent or not a string.
    MissingFields,
}

/// Parse the serialized argument payload from a model function call.
pub fn parse_args(raw: &str) -> Result<TranslateArgs, ArgError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ArgError::Unparseable)?;

    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(ArgError::MissingFields)
    };

    Ok(TranslateArgs {
        message: field("message")?,
        to_language: field("to_language")?,
    })
}

/// Resolve a tool call through the fallback translator.
///
/// Returns the translated text, or `None` on any translator failure so the
/// engine can fold a failure notice into a function turn.
pub async fn dispatch(
    translator: &TranslateManager,
    message: &str,
    to_language: &str,
) -> Option<String> {
    translator
        .translate(message, to_language)
        .await
        .map(|translated| translated.text)
}
