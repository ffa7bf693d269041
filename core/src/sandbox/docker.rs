//! Docker CLI based container runtime.
//!
//! Every mutation runs in a throwaway container which is then committed to a
//! new image, so snapshots are image ids and never change once created.
//! Works with any CLI that speaks the docker subcommands used here (podman
//! included).

use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::provider::{ContainerRuntime, ExecOutput, ExecResult, SnapshotId};

/// Exit status docker uses when the daemon itself failed to run a container.
const DOCKER_RUN_FAILURE: i32 = 125;

/// Runtime backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    /// Path or name of the CLI binary.
    program: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    /// Creates a runtime using the `docker` binary on `PATH`.
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Creates a runtime using a custom CLI binary, e.g. `podman`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Returns the CLI binary this runtime invokes.
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, args: &[String]) -> Result<Output> {
        tracing::debug!(program = %self.program, args = ?args, "invoking container cli");
        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::Runtime(format!("failed to run {}: {}", self.program, e)))
    }

    /// Runs a CLI command that must succeed and returns its trimmed stdout.
    async fn run_ok(&self, args: &[String]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(Error::Runtime(format!(
                "{} {} failed: {}",
                self.program,
                args.first().map(String::as_str).unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn exit_status(&self, name: &str) -> Result<i32> {
        let code = self
            .run_ok(&args(["inspect", "--format", "{{.State.ExitCode}}", name]))
            .await?;
        code.parse().map_err(|_| {
            Error::Runtime(format!("unexpected exit status '{}' for {}", code, name))
        })
    }

    async fn inspect_image(&self, image: &str) -> Result<String> {
        self.run_ok(&args(["image", "inspect", "--format", "{{.Id}}", image]))
            .await
    }

    /// Commits a stopped container to a new image and removes it.
    async fn commit(&self, name: &str) -> Result<SnapshotId> {
        let committed = self.run_ok(&args(["commit", name])).await;
        self.remove(name).await;
        Ok(SnapshotId::new(committed?))
    }

    async fn remove(&self, name: &str) {
        match self.run(&args(["rm", "-f", name])).await {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::warn!(
                container = %name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "failed to remove container, may need manual cleanup"
            ),
            Err(e) => tracing::warn!(container = %name, error = %e, "failed to remove container"),
        }
    }
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn container_name() -> String {
    format!("local-agent-{}", uuid::Uuid::new_v4())
}

/// Builds the `docker create` argv for executing `command` in `image`.
///
/// The image entrypoint is replaced by the program so argv runs verbatim.
fn create_args(name: &str, workdir: &str, image: &str, command: &[String]) -> Vec<String> {
    let mut argv = args(["create", "--name", name, "-w", workdir, "--entrypoint"]);
    argv.push(command[0].clone());
    argv.push(image.to_string());
    argv.extend(command[1..].iter().cloned());
    argv
}

/// Builds the `docker run` argv that writes stdin to `path` inside `image`.
fn write_file_args(name: &str, image: &str, path: &str) -> Vec<String> {
    args([
        "run",
        "-i",
        "--name",
        name,
        "--entrypoint",
        "sh",
        image,
        "-c",
        r#"mkdir -p "$(dirname "$1")" && cat > "$1""#,
        "sh",
        path,
    ])
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn from_image(&self, image: &str) -> Result<SnapshotId> {
        if let Ok(id) = self.inspect_image(image).await {
            return Ok(SnapshotId::new(id));
        }

        tracing::info!(image = %image, "pulling base image");
        self.run_ok(&args(["pull", image])).await?;
        Ok(SnapshotId::new(self.inspect_image(image).await?))
    }

    async fn with_directory(
        &self,
        base: &SnapshotId,
        path: &str,
        source: &Path,
    ) -> Result<SnapshotId> {
        if !source.is_dir() {
            return Err(Error::InvalidSource(source.to_path_buf()));
        }

        let name = container_name();
        self.run_ok(&args(["create", "--name", name.as_str(), base.as_str()]))
            .await?;

        let copy = self
            .run_ok(&[
                "cp".to_string(),
                format!("{}/.", source.display()),
                format!("{}:{}", name, path),
            ])
            .await;
        if let Err(e) = copy {
            self.remove(&name).await;
            return Err(e);
        }

        tracing::info!(source = ?source, path = %path, "copied source into container");
        self.commit(&name).await
    }

    async fn with_new_file(
        &self,
        base: &SnapshotId,
        path: &str,
        contents: &str,
    ) -> Result<SnapshotId> {
        let name = container_name();
        let mut child = Command::new(&self.program)
            .args(write_file_args(&name, base.as_str(), path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Runtime(format!("failed to run {}: {}", self.program, e)))?;

        let stdin = child.stdin.take();
        let waited = async move {
            if let Some(mut stdin) = stdin {
                // The shell exits early when the path is unusable; its status
                // carries the failure.
                if let Err(e) = stdin.write_all(contents.as_bytes()).await {
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        return Err(e);
                    }
                }
            }
            child.wait_with_output().await
        }
        .await;

        let output = match waited {
            Ok(output) => output,
            Err(e) => {
                self.remove(&name).await;
                return Err(Error::Runtime(format!("failed to write {}: {}", path, e)));
            }
        };

        match output.status.code() {
            Some(0) => {}
            Some(DOCKER_RUN_FAILURE) | None => {
                self.remove(&name).await;
                return Err(Error::Runtime(format!(
                    "container engine failed to write {}: {}",
                    path,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            Some(_) => {
                self.remove(&name).await;
                return Err(Error::InvalidArgument(format!(
                    "cannot write {}: {}",
                    path,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        self.commit(&name).await
    }

    async fn exec(&self, base: &SnapshotId, workdir: &str, command: &[String]) -> Result<ExecResult> {
        if command.is_empty() {
            return Err(Error::InvalidArgument("empty command".to_string()));
        }

        let name = container_name();
        self.run_ok(&create_args(&name, workdir, base.as_str(), command))
            .await?;

        let output = match self.run(&args(["start", "--attach", name.as_str()])).await {
            Ok(output) => output,
            Err(e) => {
                self.remove(&name).await;
                return Err(e);
            }
        };

        // The container's recorded status, not the CLI's, is the command's.
        let exit_code = match self.exit_status(&name).await {
            Ok(code) => code,
            Err(e) => {
                self.remove(&name).await;
                return Err(e);
            }
        };
        if exit_code == 0 && !output.status.success() {
            self.remove(&name).await;
            return Err(Error::Runtime(format!(
                "container engine failed to run {:?}: {}",
                command,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!(command = ?command, exit_code, "command finished");

        Ok(ExecResult {
            snapshot: self.commit(&name).await?,
            output: ExecOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
        })
    }

    async fn file_contents(&self, base: &SnapshotId, path: &str) -> Result<String> {
        let output = self
            .run(&args([
                "run",
                "--rm",
                "--entrypoint",
                "cat",
                base.as_str(),
                path,
            ]))
            .await?;

        match output.status.code() {
            Some(0) => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
            Some(DOCKER_RUN_FAILURE) | None => Err(Error::Runtime(format!(
                "container engine failed to read {}: {}",
                path,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Some(_) => Err(Error::FileNotFound {
                path: path.to_string(),
            }),
        }
    }
}
