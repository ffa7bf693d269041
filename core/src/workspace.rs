//! Alpine based workspace.
//!
//! A [`Workspace`] owns one [`Container`] with the source tree mounted at
//! [`WORKSPACE_PATH`]. Every mutating operation replaces the held container
//! with the handle describing the new state, so the workspace reflects what
//! actually happened even when an operation reports a failure.

use crate::error::{Error, Result};
use crate::sandbox::{Client, Container, ReturnType, SourceTree};

/// Base image every workspace starts from.
pub const BASE_IMAGE: &str = "alpine:3";

/// Where the source tree is mounted; also the working directory.
pub const WORKSPACE_PATH: &str = "/workspace";

/// Package installer invocation, followed by the package names.
pub const PACKAGE_INSTALL_COMMAND: [&str; 3] = ["apk", "add", "--no-cache"];

/// Directory listing invocation used by [`Workspace::tree`].
pub const TREE_COMMAND: [&str; 2] = ["tree", "."];

/// Alpine container holding a codebase, mutated through a small toolbelt.
#[derive(Debug, Clone)]
pub struct Workspace {
    container: Container,
}

impl Workspace {
    /// Creates a workspace with `source` mounted and set as the workdir.
    pub fn new(client: &Client, source: &SourceTree) -> Self {
        Self {
            container: client
                .container()
                .from(BASE_IMAGE)
                .with_directory(WORKSPACE_PATH, source)
                .with_workdir(WORKSPACE_PATH),
        }
    }

    /// Wraps an existing container.
    pub fn from_container(container: Container) -> Self {
        Self { container }
    }

    /// Returns the current container handle.
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Consumes the workspace, returning its container handle.
    pub fn into_container(self) -> Container {
        self.container
    }

    /// Install system packages using apk to the alpine workspace.
    ///
    /// Use this to install system packages like `python3`, `git`, etc.
    /// You cannot install project dependencies with this tool.
    pub async fn add_packages<S: AsRef<str>>(&mut self, packages: &[S]) -> Result<()> {
        if packages.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one package is required".to_string(),
            ));
        }

        let args = PACKAGE_INSTALL_COMMAND
            .iter()
            .map(|s| s.to_string())
            .chain(packages.iter().map(|p| p.as_ref().to_string()));
        self.with_exec(args).await
    }

    /// Run any command inside the alpine workspace.
    ///
    /// Use this to install project dependencies, run tests, etc.
    ///
    /// The workspace always moves to the post-execution state. A non-zero
    /// exit status yields [`Error::CommandFailed`] carrying stdout and stderr;
    /// any failure to query the runtime is returned as is.
    pub async fn with_exec<S: Into<String>>(
        &mut self,
        args: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(Error::InvalidArgument(
                "command must name an executable".to_string(),
            ));
        }

        tracing::info!(args = ?args, "running workspace command");
        self.container = self.container.with_exec_expect(args, ReturnType::Any);

        let exit_code = self.container.exit_code().await?;
        if exit_code == 0 {
            return Ok(());
        }

        let stdout = self.container.stdout().await?;
        let stderr = self.container.stderr().await?;
        tracing::warn!(exit_code, "workspace command failed");
        Err(Error::CommandFailed {
            exit_code,
            output: format!("{}\n{}", stdout, stderr),
        })
    }

    /// Read a file at a given path and returns its content.
    pub async fn read(&self, path: &str) -> Result<String> {
        if path.is_empty() {
            return Err(Error::InvalidArgument("path cannot be empty".to_string()));
        }
        self.container.file_contents(path).await
    }

    /// Write a file at a given path with the provided content.
    ///
    /// Nothing runs until the workspace is next queried.
    pub fn write(&mut self, path: &str, contents: &str) -> &mut Self {
        self.container = self.container.with_new_file(path, contents);
        self
    }

    /// List the available files in tree format.
    pub async fn tree(&self) -> Result<String> {
        self.container.with_exec(TREE_COMMAND).stdout().await
    }
}
