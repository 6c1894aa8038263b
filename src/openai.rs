//! Model backend: OpenAI chat-completion wire types and the single
//! `complete` call the conversation engine drives.
//!
//! Errors are classified into a small taxonomy the engine's retry logic
//! keys off: connectivity and 5xx responses are transient and retried with
//! backoff, 429 is transient with a longer backoff, everything else is
//! fatal for the attempt.

use crate::config::Config;
use crate::tools;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// One turn in a conversation. Ordering is significant; the message
/// sequence is the entire state of a translation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    /// Null for assistant turns that are pure tool invocations.
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self::text("system", content)
    }

    pub fn user(content: &str) -> Self {
        Self::text("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::text("assistant", content)
    }

    /// A user turn labeled with a name, used to mark the source text.
    pub fn user_named(content: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::text("user", content)
        }
    }

    /// A function-result turn.
    pub fn function(name: &str, content: &str) -> Self {
        Self {
            role: "function".to_string(),
            content: Some(content.to_string()),
            name: Some(name.to_string()),
            function_call: None,
        }
    }

    /// An assistant turn that invokes a function, with no textual content.
    pub fn tool_call(call: FunctionCall) -> Self {
        Self {
            role: "assistant".to_string(),
            content: None,
            name: None,
            function_call: Some(call),
        }
    }

    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            name: None,
            function_call: None,
        }
    }
}

/// A structured function invocation issued by the model. Arguments arrive
/// as a serialized JSON payload and are validated in `tools`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Token usage reported for one completion.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One model reply: textual content, a tool call, or (degenerately) neither.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: Option<String>,
    pub function_call: Option<FunctionCall>,
    pub usage: Usage,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    /// Connectivity failure or 5xx; retried after a short backoff.
    #[error("model service unavailable: {0}")]
    Unavailable(String),
    /// 429; retried after a long backoff.
    #[error("model rate limited: {0}")]
    RateLimited(String),
    /// Anything else; propagated, never retried.
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

/// Early snapshot models ignore the functions parameter or hallucinate
/// call payloads, so function calling is force-disabled for them.
pub fn supports_function_calling(model: &str) -> bool {
    !model.ends_with("0301")
}

/// Run one chat completion over the full message history.
pub async fn complete(
    client: &reqwest::Client,
    config: &Config,
    messages: &[Message],
    allow_tools: bool,
) -> Result<Completion, CompletionError> {
    let request = ChatRequest {
        model: &config.openai_model,
        messages,
        temperature: 0.1,
        presence_penalty: -0.1,
        frequency_penalty: -0.1,
        functions: allow_tools.then(tools::function_schemas),
    };

    let response = client
        .post(&config.openai_api_url)
        .header("Authorization", format!("Bearer {}", config.openai_api_key))
        .header("Content-Type", "application/json")
        .json(&request)
        .send()
        .await
        .map_err(|e| CompletionError::Unavailable(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let body = response.text().await.unwrap_or_default();
        return Err(CompletionError::RateLimited(body));
    }
    if status.is_server_error() {
        let body = response.text().await.unwrap_or_default();
        return Err(CompletionError::Unavailable(format!("{status}: {body}")));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CompletionError::Fatal(anyhow::anyhow!(
            "OpenAI API error ({status}): {body}"
        )));
    }

    let chat_response: ChatResponse = response
        .json()
        .await
        .context("Failed to parse OpenAI response")?;

    let choice = chat_response
        .choices
        .into_iter()
        .next()
        .context("OpenAI response contained no choices")?;

    Ok(Completion {
        content: choice.message.content,
        function_call: choice.message.function_call,
        usage: chat_response.usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_string_contains, header, method},
        Mock, MockServer, ResponseTemplate,
    };

    fn test_config(api_url: &str) -> Config {
        Config {
            crowdin_api_key: "crowdin-test".to_string(),
            crowdin_api_url: "https://api.crowdin.com/api/v2".to_string(),
            openai_api_key: "test-openai-key".to_string(),
            openai_api_url: api_url.to_string(),
            openai_model: "gpt-3.5-turbo".to_string(),
            translate_api_url: "http://unused.test".to_string(),
            pre_translate: false,
            process_qa: false,
            review_mode: crate::config::ReviewMode::FullAuto,
            data_dir: std::path::PathBuf::from("data"),
        }
    }

    fn content_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [
                {
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }
            ],
            "usage": {"prompt_tokens": 100, "completion_tokens": 50, "total_tokens": 150}
        })
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_message_content_serializes_null_for_tool_calls() {
        let message = Message::tool_call(FunctionCall {
            name: "get_translation".to_string(),
            arguments: "{}".to_string(),
        });
        let json = serde_json::to_string(&message).expect("Should serialize");
        assert!(json.contains("\"content\":null"));
        assert!(json.contains("get_translation"));
    }

    #[test]
    fn test_message_skips_absent_optional_fields() {
        let json = serde_json::to_string(&Message::user("Hello")).expect("Should serialize");
        assert!(!json.contains("name"));
        assert!(!json.contains("function_call"));
    }

    #[test]
    fn test_user_named_carries_label() {
        let json =
            serde_json::to_string(&Message::user_named("Hello", "source_text")).unwrap();
        assert!(json.contains("\"name\":\"source_text\""));
    }

    #[test]
    fn test_chat_request_omits_functions_when_disabled() {
        let messages = vec![Message::user("Hi")];
        let request = ChatRequest {
            model: "gpt-3.5-turbo",
            messages: &messages,
            temperature: 0.1,
            presence_penalty: -0.1,
            frequency_penalty: -0.1,
            functions: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("functions"));
    }

    #[test]
    fn test_response_parses_function_call_reply() {
        let json = r#"{
            "choices": [
                {
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "function_call": {
                            "name": "get_translation",
                            "arguments": "{\"message\": \"Hi\", \"to_language\": \"French\"}"
                        }
                    }
                }
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response: ChatResponse = serde_json::from_str(json).expect("Should deserialize");
        let call = response.choices[0]
            .message
            .function_call
            .as_ref()
            .expect("Should carry a call");
        assert_eq!(call.name, "get_translation");
        assert!(response.choices[0].message.content.is_none());
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[test]
    fn test_supports_function_calling() {
        assert!(supports_function_calling("gpt-3.5-turbo"));
        assert!(supports_function_calling("gpt-4"));
        assert!(!supports_function_calling("gpt-3.5-turbo-0301"));
        assert!(!supports_function_calling("gpt-4-0301"));
    }

    // ==================== complete() Tests ====================

    #[tokio::test]
    async fn test_complete_success() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer test-openai-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(content_response("Bonjour")))
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        let completion = complete(&client, &config, &[Message::user("Hello")], false)
            .await
            .expect("Should succeed");

        assert_eq!(completion.content.as_deref(), Some("Bonjour"));
        assert!(completion.function_call.is_none());
        assert_eq!(completion.usage.total_tokens, 150);
    }

    #[tokio::test]
    async fn test_complete_sends_function_schema_when_tools_allowed() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("get_translation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(content_response("Hi")))
            .expect(1)
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        complete(&client, &config, &[Message::user("Hello")], true)
            .await
            .expect("Should succeed");
    }

    #[tokio::test]
    async fn test_complete_classifies_rate_limit() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        let err = complete(&client, &config, &[Message::user("Hi")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_complete_classifies_server_error_as_unavailable() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        let err = complete(&client, &config, &[Message::user("Hi")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_complete_classifies_client_error_as_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_string(r#"{"error": {"message": "bad request"}}"#),
            )
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        let err = complete(&client, &config, &[Message::user("Hi")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Fatal(_)));
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn test_complete_connection_failure_is_unavailable() {
        // Nothing listens on this port
        let config = test_config("http://127.0.0.1:1/v1/chat/completions");
        let client = reqwest::Client::new();
        let err = complete(&client, &config, &[Message::user("Hi")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_complete_empty_choices_is_fatal() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&mock_server)
            .await;

        let config = test_config(&mock_server.uri());
        let client = reqwest::Client::new();
        let err = complete(&client, &config, &[Message::user("Hi")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Fatal(_)));
        assert!(err.to_string().contains("no choices"));
    }
}
