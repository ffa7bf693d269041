//! Agent execution.
//!
//! [`AgentExecutor`] is the seam the environment assembler depends on.
//! [`LlmAgent`] implements it with a tool-calling loop over any
//! [`ChatProvider`]; [`OpenAiChatProvider`] speaks the OpenAI-compatible
//! chat completions API.

mod llm;
mod openai;
mod tools;

pub use llm::LlmAgent;
pub use openai::OpenAiChatProvider;
pub use tools::{dispatch, workspace_tools, SAVE_TOOL};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::Result;

/// Runs an instruction against a bound environment.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executes `prompt` with `env` and returns the environment with its
    /// outputs filled.
    async fn run(&self, env: Env, prompt: &str) -> Result<Env>;

    /// Returns the name of this executor.
    fn name(&self) -> &str;
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on tool results.
    pub tool_call_id: Option<String>,
    /// Set on assistant messages that requested tools.
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::with_role(Role::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// Request for one model turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
}

/// The model's answer for one turn.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Free text, if any.
    pub content: Option<String>,
    /// Tools to run before the next turn. Empty means the model is done.
    pub tool_calls: Vec<ToolCall>,
}

/// Backend that completes chat conversations.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Requests the next assistant turn.
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Returns the name of this provider.
    fn name(&self) -> &str;
}
