//! OpenAI-compatible chat completions provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::{Error, Result};

use super::{ChatMessage, ChatProvider, ChatRequest, ChatResponse, Role, ToolCall};

/// Provider for any endpoint that implements `POST /chat/completions`.
pub struct OpenAiChatProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChatProvider {
    /// Creates a provider for `base_url` (with or without a trailing `/v1`).
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Creates a provider from agent configuration, reading the API key
    /// from the configured environment variable.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            tracing::warn!(
                variable = %config.api_key_env,
                "API key variable not set, sending unauthenticated requests"
            );
        }
        Self::new(config.base_url.clone(), api_key)
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if base.ends_with("/v1") {
            format!("{}/{}", base, path)
        } else {
            format!("{}/v1/{}", base, path)
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let url = self.api_url("chat/completions");
        let body = ChatCompletionRequest::from(request);

        tracing::debug!(url = %url, model = %body.model, messages = body.messages.len(), "sending chat completion");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Llm(format!("request to {} failed: {}", url, e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Llm(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Llm(format!(
                "HTTP {}: {}",
                status,
                truncate(&text, 512)
            )));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text).map_err(|e| {
            Error::Llm(format!(
                "invalid response: {}. Raw: {}",
                e,
                truncate(&text, 512)
            ))
        })?;

        parsed.into_response()
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Truncates `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

// OpenAI-compatible Chat Completions API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatCompletionTool>,
}

impl From<ChatRequest> for ChatCompletionRequest {
    fn from(request: ChatRequest) -> Self {
        Self {
            model: request.model,
            messages: request.messages.into_iter().map(Into::into).collect(),
            temperature: request.temperature,
            tools: request
                .tools
                .into_iter()
                .map(|t| ChatCompletionTool {
                    tool_type: "function".to_string(),
                    function: ChatCompletionFunction {
                        name: t.name,
                        description: t.description,
                        parameters: t.parameters,
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionMessage {
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

impl From<ChatMessage> for ChatCompletionMessage {
    fn from(msg: ChatMessage) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .into_iter()
                    .map(|tc| ChatCompletionToolCall {
                        id: tc.id,
                        call_type: "function".to_string(),
                        function: ChatCompletionToolCallFunction {
                            name: tc.name,
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect(),
            )
        };

        let content = if msg.role == Role::Assistant && tool_calls.is_some() && msg.content.is_empty()
        {
            None
        } else {
            Some(msg.content)
        };

        Self {
            role: msg.role,
            content,
            tool_call_id: msg.tool_call_id,
            tool_calls,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: ChatCompletionFunction,
}

#[derive(Debug, Serialize)]
struct ChatCompletionFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

impl ChatCompletionResponse {
    fn into_response(self) -> Result<ChatResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("no choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                // Models occasionally send malformed JSON; pass it through as a
                // string so the tool reports a recoverable argument error.
                let arguments = serde_json::from_str(&tc.function.arguments)
                    .unwrap_or(serde_json::Value::String(tc.function.arguments));
                ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(ChatResponse {
            content: choice.message.content,
            tool_calls,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ChatCompletionToolCall>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ChatCompletionToolCallFunction,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatCompletionToolCallFunction {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ToolDefinition;

    fn provider(base_url: &str) -> OpenAiChatProvider {
        OpenAiChatProvider::new(base_url, None).unwrap()
    }

    #[test]
    fn api_url_adds_v1_when_missing() {
        assert_eq!(
            provider("http://127.0.0.1:8318").api_url("chat/completions"),
            "http://127.0.0.1:8318/v1/chat/completions"
        );
        assert_eq!(
            provider("https://api.openai.com/v1/").api_url("/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn request_serializes_tools_as_functions() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![ToolDefinition {
                name: "tree".to_string(),
                description: "List files".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            temperature: None,
        };

        let json = serde_json::to_value(ChatCompletionRequest::from(request)).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "tree");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn request_without_tools_omits_field() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            tools: vec![],
            temperature: Some(0.0),
        };

        let json = serde_json::to_value(ChatCompletionRequest::from(request)).unwrap();
        assert!(json.get("tools").is_none());
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = ChatMessage::assistant(
            "",
            vec![ToolCall {
                id: "call_1".to_string(),
                name: "read".to_string(),
                arguments: serde_json::json!({"path": "a.txt"}),
            }],
        );

        let wire = ChatCompletionMessage::from(msg);

        assert!(wire.content.is_none());
        let calls = wire.tool_calls.expect("tool_calls present");
        assert_eq!(calls[0].function.arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn tool_result_keeps_call_id() {
        let wire = ChatCompletionMessage::from(ChatMessage::tool_result("call_9", "done"));

        assert_eq!(wire.role, Role::Tool);
        assert_eq!(wire.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(wire.content.as_deref(), Some("done"));
    }

    #[test]
    fn response_parses_tool_calls() {
        let raw = r#"{
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "add_packages", "arguments": "{\"packages\":[\"git\"]}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;

        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let response = response.into_response().unwrap();

        assert!(response.content.is_none());
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "add_packages");
        assert_eq!(
            response.tool_calls[0].arguments,
            serde_json::json!({"packages": ["git"]})
        );
    }

    #[test]
    fn malformed_arguments_become_a_string() {
        let raw = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"id":"c","type":"function","function":{"name":"read","arguments":"{oops"}}]}}]}"#;

        let response: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        let response = response.into_response().unwrap();

        assert_eq!(
            response.tool_calls[0].arguments,
            serde_json::Value::String("{oops".to_string())
        );
    }

    #[test]
    fn empty_choices_is_an_error() {
        let response: ChatCompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(matches!(response.into_response(), Err(Error::Llm(_))));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("héllo", 2), "h");
    }
}
