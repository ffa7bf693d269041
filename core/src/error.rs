//! Error types for local-agent.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for workspace and agent operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The container runtime could not be reached or queried.
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// A workspace command ran and exited non-zero.
    #[error("exit code {exit_code}, out: {output}")]
    CommandFailed { exit_code: i32, output: String },

    /// A command run in strict mode exited non-zero.
    #[error("command {args:?} failed with exit code {exit_code}: {stderr}")]
    ExecFailed {
        args: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    /// The requested path does not exist or is not a regular file.
    #[error("file not found: {path}")]
    FileNotFound { path: String },

    /// The source directory cannot be mounted.
    #[error("invalid source directory: {0}")]
    InvalidSource(PathBuf),

    /// An operation was called with arguments it cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The model asked for a tool that does not exist.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// An environment output was never bound.
    #[error("environment has no output named '{0}'")]
    MissingOutput(String),

    /// The agent loop could not finish.
    #[error("agent error: {0}")]
    Agent(String),

    /// The LLM provider request failed.
    #[error("LLM request failed: {0}")]
    Llm(String),

    /// IO error while talking to the host.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true for failures an agent can observe and react to.
    ///
    /// Runtime, transport and configuration failures are fatal and never
    /// reported back to the model.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CommandFailed { .. }
                | Error::ExecFailed { .. }
                | Error::FileNotFound { .. }
                | Error::InvalidArgument(_)
                | Error::UnknownTool(_)
        )
    }
}

/// Result type alias for local-agent operations.
pub type Result<T> = std::result::Result<T, Error>;
