//! Local Agent - container development environments assembled by an LLM
//!
//! This library mounts a codebase into an alpine container and lets an agent
//! install whatever system packages and project dependencies it needs, returning
//! the resulting container.

pub mod agent;
pub mod config;
pub mod env;
pub mod error;
pub mod prompt;
pub mod runner;
pub mod sandbox;
pub mod workspace;

pub use agent::LocalAgent;
pub use config::{
    AgentConfig, Config, RuntimeConfig, RuntimeKind, Validate, ValidationResult, KNOWN_RUNTIMES,
};
pub use env::{Env, Input, Output};
pub use error::{Error, Result};
pub use runner::{
    AgentExecutor, ChatMessage, ChatProvider, ChatRequest, ChatResponse, LlmAgent,
    OpenAiChatProvider, Role, ToolCall, ToolDefinition,
};
pub use sandbox::{
    Client, Container, ContainerRuntime, DockerRuntime, ExecOutput, MemoryRuntime, ReturnType,
    SnapshotId, SourceTree,
};
pub use workspace::{Workspace, BASE_IMAGE, WORKSPACE_PATH};
