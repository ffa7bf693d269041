//! Development environment assembly.

use std::sync::Arc;

use crate::env::Env;
use crate::error::Result;
use crate::prompt::{
    DEV_ENVIRONMENT_PROMPT, RESULT_OUTPUT, RESULT_OUTPUT_DESCRIPTION, WORKSPACE_INPUT,
    WORKSPACE_INPUT_DESCRIPTION,
};
use crate::runner::AgentExecutor;
use crate::sandbox::{Client, Container, SourceTree};
use crate::workspace::Workspace;

/// Builds development environments for a source tree using an agent.
pub struct LocalAgent {
    client: Client,
    executor: Arc<dyn AgentExecutor>,
}

impl LocalAgent {
    pub fn new(client: Client, executor: Arc<dyn AgentExecutor>) -> Self {
        Self { client, executor }
    }

    /// Returns the client containers are created through.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Creates a fresh workspace holding `source`.
    pub fn workspace(&self, source: &SourceTree) -> Workspace {
        Workspace::new(&self.client, source)
    }

    /// Returns a container with the tools and dependencies `source` needs.
    ///
    /// The agent receives the workspace as its `workspace` input and must
    /// fill the `result` output. Errors from the agent are returned unchanged.
    pub async fn dev_environment(&self, source: &SourceTree) -> Result<Container> {
        tracing::info!(
            source = %source.path().display(),
            runtime = self.client.runtime_name(),
            executor = self.executor.name(),
            "building development environment"
        );

        let env = Env::new()
            .with_workspace_input(
                WORKSPACE_INPUT,
                self.workspace(source),
                WORKSPACE_INPUT_DESCRIPTION,
            )
            .with_workspace_output(RESULT_OUTPUT, RESULT_OUTPUT_DESCRIPTION);

        let env = self.executor.run(env, DEV_ENVIRONMENT_PROMPT).await?;
        let container = env.output(RESULT_OUTPUT)?.container().clone();

        tracing::info!("development environment ready");
        Ok(container)
    }
}
