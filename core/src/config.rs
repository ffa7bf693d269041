//! Configuration loading and validation.
//!
//! Configuration comes from an optional TOML file, then environment
//! variables override individual fields:
//!
//! - `LOCAL_AGENT_RUNTIME=docker|memory` - container runtime
//! - `LOCAL_AGENT_CONTAINER_CLI` - docker compatible CLI binary
//! - `LOCAL_AGENT_MODEL` - model name sent to the chat provider
//! - `LOCAL_AGENT_BASE_URL` - chat completions endpoint
//! - `LOCAL_AGENT_API_KEY_ENV` - variable holding the API key
//! - `LOCAL_AGENT_MAX_TURNS` - model turns before giving up

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Known runtime identifiers.
pub const KNOWN_RUNTIMES: &[&str] = &["docker", "memory"];

/// Which container runtime backs the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Docker compatible CLI.
    #[default]
    Docker,
    /// In-process runtime; commands are simulated.
    Memory,
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "memory" => Ok(RuntimeKind::Memory),
            other => Err(Error::Config(format!(
                "unknown runtime '{}', expected one of {}",
                other,
                KNOWN_RUNTIMES.join(", ")
            ))),
        }
    }
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub kind: RuntimeKind,

    /// CLI binary for the docker runtime.
    #[serde(default = "default_program")]
    pub program: String,
}

fn default_program() -> String {
    "docker".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            kind: RuntimeKind::default(),
            program: default_program(),
        }
    }
}

/// LLM agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model to request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the chat completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable holding the API key. The key itself is never
    /// stored in configuration.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Maximum model turns per run.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Tool results longer than this many bytes are truncated.
    #[serde(default = "default_max_tool_output")]
    pub max_tool_output: usize,

    /// Sampling temperature, provider default when unset.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_turns() -> u32 {
    50
}

fn default_max_tool_output() -> usize {
    16 * 1024
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            max_turns: default_max_turns(),
            max_tool_output: default_max_tool_output(),
            temperature: None,
        }
    }
}

impl AgentConfig {
    /// Sets the maximum number of model turns.
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

impl Config {
    /// Parses configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Reads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Loads the optional file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kind) = lookup("LOCAL_AGENT_RUNTIME") {
            self.runtime.kind = kind.parse()?;
        }
        if let Some(program) = lookup("LOCAL_AGENT_CONTAINER_CLI") {
            self.runtime.program = program;
        }
        if let Some(model) = lookup("LOCAL_AGENT_MODEL") {
            self.agent.model = model;
        }
        if let Some(base_url) = lookup("LOCAL_AGENT_BASE_URL") {
            self.agent.base_url = base_url;
        }
        if let Some(api_key_env) = lookup("LOCAL_AGENT_API_KEY_ENV") {
            self.agent.api_key_env = api_key_env;
        }
        if let Some(max_turns) = lookup("LOCAL_AGENT_MAX_TURNS") {
            self.agent.max_turns = max_turns.trim().parse().map_err(|_| {
                Error::Config(format!("LOCAL_AGENT_MAX_TURNS must be a number, got '{}'", max_turns))
            })?;
        }
        Ok(())
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        match self.kind {
            RuntimeKind::Docker => {
                if self.program.trim().is_empty() {
                    result.add_error("runtime.program cannot be empty");
                }
            }
            RuntimeKind::Memory => {
                result.add_warning("memory runtime simulates commands, nothing is installed");
            }
        }

        result
    }
}

impl Validate for AgentConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.model.trim().is_empty() {
            result.add_error("agent.model cannot be empty");
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            result.add_error(format!(
                "agent.base_url '{}' must be an http(s) URL",
                self.base_url
            ));
        }

        if self.max_turns == 0 {
            result.add_error("agent.max_turns must be at least 1");
        }

        if self.max_turns > 200 {
            result.add_warning("agent.max_turns > 200 may lead to excessive LLM calls");
        }

        if self.max_tool_output < 1024 {
            result.add_warning("agent.max_tool_output under 1 KiB hides most command output");
        }

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                result.add_error("agent.temperature must be between 0 and 2");
            }
        }

        result
    }
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult {
        let mut result = self.runtime.validate();
        result.merge(self.agent.validate());
        result
    }
}
