//! Declarative agent environment.
//!
//! An [`Env`] names the workspaces an agent starts from (inputs) and the
//! workspaces it is expected to hand back (outputs).

use crate::error::{Error, Result};
use crate::workspace::Workspace;

/// A named workspace given to the agent.
#[derive(Debug, Clone)]
pub struct Input {
    /// Binding name the agent refers to.
    pub name: String,
    /// Human-readable description shown to the agent.
    pub description: String,
    /// The bound workspace.
    pub value: Workspace,
}

/// A named slot the agent must fill.
#[derive(Debug, Clone)]
pub struct Output {
    /// Binding name the agent refers to.
    pub name: String,
    /// Description of the expected result.
    pub description: String,
    /// The saved workspace, once the agent has produced one.
    pub value: Option<Workspace>,
}

/// Inputs and outputs for one agent run.
#[derive(Debug, Clone, Default)]
pub struct Env {
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

impl Env {
    /// Creates an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a workspace as a named input.
    pub fn with_workspace_input(
        mut self,
        name: impl Into<String>,
        value: Workspace,
        description: impl Into<String>,
    ) -> Self {
        self.inputs.push(Input {
            name: name.into(),
            description: description.into(),
            value,
        });
        self
    }

    /// Declares a named workspace output.
    pub fn with_workspace_output(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.outputs.push(Output {
            name: name.into(),
            description: description.into(),
            value: None,
        });
        self
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Looks up an input by name.
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs.iter().find(|i| i.name == name)
    }

    /// Stores `value` in the output slot `name`.
    pub fn set_output(&mut self, name: &str, value: Workspace) -> Result<()> {
        let slot = self
            .outputs
            .iter_mut()
            .find(|o| o.name == name)
            .ok_or_else(|| Error::MissingOutput(name.to_string()))?;
        slot.value = Some(value);
        Ok(())
    }

    /// Returns the workspace saved in output `name`.
    pub fn output(&self, name: &str) -> Result<&Workspace> {
        self.outputs
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_ref())
            .ok_or_else(|| Error::MissingOutput(name.to_string()))
    }

    /// Names of outputs that have not been filled yet.
    pub fn pending_outputs(&self) -> Vec<&str> {
        self.outputs
            .iter()
            .filter(|o| o.value.is_none())
            .map(|o| o.name.as_str())
            .collect()
    }
}
