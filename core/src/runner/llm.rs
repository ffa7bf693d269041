//! Tool-calling agent loop over a chat provider.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AgentConfig;
use crate::env::Env;
use crate::error::{Error, Result};
use crate::prompt::system_prompt;

use super::openai::truncate;
use super::tools::{dispatch, workspace_tools};
use super::{AgentExecutor, ChatMessage, ChatProvider, ChatRequest};

/// Agent that drives the workspace toolbelt with an LLM.
///
/// Tools act on a working copy of the first input workspace. The loop ends
/// when the model answers without calling tools; outputs the model never
/// saved are filled with the working workspace.
pub struct LlmAgent {
    provider: Arc<dyn ChatProvider>,
    config: AgentConfig,
}

impl LlmAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, config: AgentConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl AgentExecutor for LlmAgent {
    async fn run(&self, mut env: Env, prompt: &str) -> Result<Env> {
        let mut workspace = env
            .inputs()
            .first()
            .map(|input| input.value.clone())
            .ok_or_else(|| Error::Agent("environment has no workspace input".to_string()))?;
        let tools = workspace_tools(env.outputs());
        let mut messages = vec![
            ChatMessage::system(system_prompt(&env)),
            ChatMessage::user(prompt),
        ];

        for turn in 1..=self.config.max_turns {
            let response = self
                .provider
                .complete(ChatRequest {
                    model: self.config.model.clone(),
                    messages: messages.clone(),
                    tools: tools.clone(),
                    temperature: self.config.temperature,
                })
                .await?;

            if response.tool_calls.is_empty() {
                tracing::info!(
                    turn,
                    provider = self.provider.name(),
                    "agent finished"
                );
                if let Some(text) = &response.content {
                    tracing::debug!(response = %text, "final agent message");
                }

                for name in env
                    .pending_outputs()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
                {
                    tracing::warn!(output = %name, "output not saved by agent, using working workspace");
                    env.set_output(&name, workspace.clone())?;
                }
                return Ok(env);
            }

            tracing::info!(turn, calls = response.tool_calls.len(), "agent requested tools");
            messages.push(ChatMessage::assistant(
                response.content.unwrap_or_default(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let content = match dispatch(&mut workspace, &mut env, call).await {
                    Ok(text) => text,
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                        format!("error: {}", e)
                    }
                    Err(e) => {
                        tracing::error!(tool = %call.name, error = %e, "runtime failure during tool call");
                        return Err(e);
                    }
                };
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    clip(&content, self.config.max_tool_output),
                ));
            }
        }

        Err(Error::Agent(format!(
            "agent did not finish within {} turns",
            self.config.max_turns
        )))
    }

    fn name(&self) -> &str {
        "llm"
    }
}

/// Shortens `text` to about `max` bytes, keeping its start and its end.
///
/// Command failures put stderr last, so most of the budget goes to the tail.
fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }

    let head = truncate(text, max / 4);
    let mut tail_start = text.len() - (max - max / 4);
    while !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    format!(
        "{}\n[... {} bytes omitted ...]\n{}",
        head,
        tail_start - head.len(),
        &text[tail_start..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{ChatResponse, Role, ToolCall};
    use crate::sandbox::{Client, ExecOutput, MemoryRuntime};
    use crate::workspace::Workspace;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider that replays canned responses and records requests.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<ChatResponse>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedProvider {
        fn new(responses: Vec<ChatResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| Error::Llm("script exhausted".to_string()))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn calls(calls: &[(&str, serde_json::Value)]) -> ChatResponse {
        ChatResponse {
            content: None,
            tool_calls: calls
                .iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall {
                    id: format!("call_{}", i),
                    name: name.to_string(),
                    arguments: args.clone(),
                })
                .collect(),
        }
    }

    fn done() -> ChatResponse {
        ChatResponse {
            content: Some("all set".to_string()),
            tool_calls: vec![],
        }
    }

    fn env(runtime: MemoryRuntime) -> Env {
        let client = Client::new(runtime);
        let ws = Workspace::from_container(
            client.container().from("alpine:3").with_workdir("/workspace"),
        );
        Env::new()
            .with_workspace_input("workspace", ws, "input")
            .with_workspace_output("result", "output")
    }

    #[tokio::test]
    async fn agent_runs_tools_and_saves_output() {
        let provider = ScriptedProvider::new(vec![
            calls(&[
                ("add_packages", serde_json::json!({"packages": ["git"]})),
                ("write", serde_json::json!({"path": "a.txt", "contents": "hi"})),
            ]),
            calls(&[("save", serde_json::json!({"name": "result"}))]),
            done(),
        ]);
        let agent = LlmAgent::new(provider.clone(), AgentConfig::default());

        let env = agent.run(env(MemoryRuntime::new()), "set it up").await.unwrap();
        let result = env.output("result").unwrap();

        assert_eq!(result.read("a.txt").await.unwrap(), "hi");
        assert_eq!(result.read("/etc/apk/world").await.unwrap(), "git\n");

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].messages[1].content, "set it up");
        assert_eq!(requests[0].tools.len(), 6);
    }

    #[tokio::test]
    async fn command_failures_are_fed_back_to_the_model() {
        let provider = ScriptedProvider::new(vec![
            calls(&[("with_exec", serde_json::json!({"args": ["cargo", "build"]}))]),
            done(),
        ]);
        let agent = LlmAgent::new(provider.clone(), AgentConfig::default());

        agent.run(env(MemoryRuntime::new()), "build").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result sent back");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_0"));
        assert!(tool_msg.content.starts_with("error: exit code 127"));
        assert!(tool_msg.content.contains("cargo: not found"));
    }

    #[test]
    fn clip_keeps_head_and_tail() {
        assert_eq!(clip("short", 100), "short");

        let text = format!("{}{}", "a".repeat(1000), "TAIL");
        let clipped = clip(&text, 100);

        assert!(clipped.starts_with(&"a".repeat(25)));
        assert!(clipped.ends_with("TAIL"));
        assert!(clipped.contains("[... 904 bytes omitted ...]"));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let text = "é".repeat(100);
        let clipped = clip(&text, 51);

        assert!(clipped.starts_with("éééééé"));
        assert!(clipped.ends_with('é'));
    }

    #[tokio::test]
    async fn long_command_output_keeps_stderr() {
        let runtime = MemoryRuntime::new().with_handler("pytest", |_, _| ExecOutput {
            exit_code: 1,
            stdout: "collected\n".repeat(2_000),
            stderr: "ModuleNotFoundError: No module named 'yaml'".to_string(),
        });
        let provider = ScriptedProvider::new(vec![
            calls(&[("with_exec", serde_json::json!({"args": ["pytest"]}))]),
            done(),
        ]);
        let agent = LlmAgent::new(provider.clone(), AgentConfig::default());

        agent.run(env(runtime), "test").await.unwrap();

        let requests = provider.requests.lock().unwrap();
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .expect("tool result sent back");
        assert!(tool_msg.content.starts_with("error: exit code 1"));
        assert!(tool_msg.content.contains("bytes omitted"));
        assert!(tool_msg
            .content
            .ends_with("ModuleNotFoundError: No module named 'yaml'"));
        assert!(tool_msg.content.len() < AgentConfig::default().max_tool_output + 64);
    }

    #[tokio::test]
    async fn unsaved_output_falls_back_to_working_workspace() {
        let provider = ScriptedProvider::new(vec![
            calls(&[("write", serde_json::json!({"path": "b.txt", "contents": "beta"}))]),
            done(),
        ]);
        let agent = LlmAgent::new(provider, AgentConfig::default());

        let env = agent.run(env(MemoryRuntime::new()), "go").await.unwrap();

        assert_eq!(env.output("result").unwrap().read("b.txt").await.unwrap(), "beta");
    }

    #[tokio::test]
    async fn runtime_failures_abort_the_run() {
        let runtime = MemoryRuntime::new();
        runtime.set_unavailable(true);
        let provider = ScriptedProvider::new(vec![calls(&[("tree", serde_json::json!({}))])]);
        let agent = LlmAgent::new(provider, AgentConfig::default());

        let err = agent.run(env(runtime), "go").await.unwrap_err();
        assert!(matches!(err, Error::Runtime(_)));
    }

    #[tokio::test]
    async fn agent_gives_up_after_max_turns() {
        let provider = ScriptedProvider::new(vec![
            calls(&[("tree", serde_json::json!({}))]),
            calls(&[("tree", serde_json::json!({}))]),
        ]);
        let agent = LlmAgent::new(provider, AgentConfig::default().with_max_turns(2));

        let err = agent.run(env(MemoryRuntime::new()), "loop").await.unwrap_err();
        assert!(matches!(err, Error::Agent(msg) if msg.contains("2 turns")));
    }

    #[tokio::test]
    async fn env_without_inputs_is_rejected() {
        let provider = ScriptedProvider::new(vec![]);
        let agent = LlmAgent::new(provider, AgentConfig::default());

        let err = agent.run(Env::new(), "go").await.unwrap_err();
        assert!(matches!(err, Error::Agent(_)));
    }
}
