//! Lazily evaluated container handles.
//!
//! A [`Container`] is an immutable chain of layers. Builder methods return a
//! new handle and leave the receiver untouched; nothing runs until a query
//! such as [`Container::exit_code`] needs the result. Each layer resolves at
//! most once and remembers its snapshot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::{Error, Result};

use super::provider::{ContainerRuntime, ExecOutput, ReturnType, SnapshotId};

/// Read-only host directory to mount into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    path: PathBuf,
}

impl SourceTree {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Explicitly constructed handle to a container runtime.
///
/// Created once at startup and passed to whatever needs containers.
#[derive(Clone)]
pub struct Client {
    runtime: Arc<dyn ContainerRuntime>,
}

impl Client {
    /// Creates a client for the given runtime.
    pub fn new(runtime: impl ContainerRuntime + 'static) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }

    /// Creates a client sharing an existing runtime.
    pub fn from_runtime(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Returns the name of the underlying runtime.
    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    /// Returns an empty container with no base image.
    pub fn container(&self) -> Container {
        Container {
            client: self.clone(),
            layer: Arc::new(Layer {
                op: Op::Scratch,
                parent: None,
                resolved: OnceCell::new(),
            }),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Scratch,
    From(String),
    WithDirectory { path: String, source: PathBuf },
    WithWorkdir(String),
    WithExec { args: Vec<String>, expect: ReturnType },
    WithNewFile { path: String, contents: String },
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Scratch => write!(f, "scratch"),
            Op::From(image) => write!(f, "from {}", image),
            Op::WithDirectory { path, source } => {
                write!(f, "with_directory {} <- {}", path, source.display())
            }
            Op::WithWorkdir(path) => write!(f, "with_workdir {}", path),
            Op::WithExec { args, .. } => write!(f, "with_exec {}", args.join(" ")),
            Op::WithNewFile { path, .. } => write!(f, "with_new_file {}", path),
        }
    }
}

struct Layer {
    op: Op,
    parent: Option<Arc<Layer>>,
    resolved: OnceCell<Resolved>,
}

impl Drop for Layer {
    // Unlink uniquely owned ancestors one at a time so long chains do not
    // recurse once per layer.
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(layer) = parent {
            match Arc::try_unwrap(layer) {
                Ok(mut layer) => parent = layer.parent.take(),
                Err(_) => break,
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Resolved {
    snapshot: Option<SnapshotId>,
    workdir: String,
    last_exec: Option<ExecOutput>,
}

impl Resolved {
    fn scratch() -> Self {
        Self {
            snapshot: None,
            workdir: "/".to_string(),
            last_exec: None,
        }
    }

    fn snapshot(&self) -> Result<&SnapshotId> {
        self.snapshot
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("container has no base image".to_string()))
    }
}

/// Handle to one container state.
#[derive(Clone)]
pub struct Container {
    client: Client,
    layer: Arc<Layer>,
}

impl Container {
    fn push(&self, op: Op) -> Container {
        Container {
            client: self.client.clone(),
            layer: Arc::new(Layer {
                op,
                parent: Some(Arc::clone(&self.layer)),
                resolved: OnceCell::new(),
            }),
        }
    }

    /// Starts from a base image.
    pub fn from(&self, image: impl Into<String>) -> Container {
        self.push(Op::From(image.into()))
    }

    /// Copies `source` into the container at `path`.
    pub fn with_directory(&self, path: impl Into<String>, source: &SourceTree) -> Container {
        self.push(Op::WithDirectory {
            path: path.into(),
            source: source.path().to_path_buf(),
        })
    }

    /// Sets the working directory for later commands and relative paths.
    pub fn with_workdir(&self, path: impl Into<String>) -> Container {
        self.push(Op::WithWorkdir(path.into()))
    }

    /// Runs a command that must exit with status zero.
    pub fn with_exec<S: Into<String>>(&self, args: impl IntoIterator<Item = S>) -> Container {
        self.with_exec_expect(args, ReturnType::Success)
    }

    /// Runs a command, accepting the exit statuses allowed by `expect`.
    pub fn with_exec_expect<S: Into<String>>(
        &self,
        args: impl IntoIterator<Item = S>,
        expect: ReturnType,
    ) -> Container {
        self.push(Op::WithExec {
            args: args.into_iter().map(Into::into).collect(),
            expect,
        })
    }

    /// Writes a file with the given contents.
    pub fn with_new_file(&self, path: impl Into<String>, contents: impl Into<String>) -> Container {
        self.push(Op::WithNewFile {
            path: path.into(),
            contents: contents.into(),
        })
    }

    /// Returns the working directory this handle would run commands in.
    ///
    /// Computed from the layer chain without touching the runtime.
    pub fn workdir(&self) -> String {
        let mut dirs = Vec::new();
        let mut cursor = Some(&self.layer);
        while let Some(layer) = cursor {
            if let Op::WithWorkdir(dir) = &layer.op {
                dirs.push(dir.as_str());
            }
            cursor = layer.parent.as_ref();
        }
        dirs.iter()
            .rev()
            .fold("/".to_string(), |current, dir| resolve_path(&current, dir))
    }

    /// Forces evaluation and returns the resulting snapshot.
    pub async fn sync(&self) -> Result<SnapshotId> {
        let resolved = self.resolve().await?;
        resolved.snapshot().cloned()
    }

    /// Exit status of the last command run in this container.
    pub async fn exit_code(&self) -> Result<i32> {
        Ok(self.last_exec().await?.exit_code)
    }

    /// Standard output of the last command run in this container.
    pub async fn stdout(&self) -> Result<String> {
        Ok(self.last_exec().await?.stdout)
    }

    /// Standard error of the last command run in this container.
    pub async fn stderr(&self) -> Result<String> {
        Ok(self.last_exec().await?.stderr)
    }

    /// Reads a file; relative paths resolve against the working directory.
    pub async fn file_contents(&self, path: &str) -> Result<String> {
        let resolved = self.resolve().await?;
        let path = resolve_path(&resolved.workdir, path);
        self.client
            .runtime
            .file_contents(resolved.snapshot()?, &path)
            .await
    }

    async fn last_exec(&self) -> Result<ExecOutput> {
        self.resolve().await?.last_exec.ok_or_else(|| {
            Error::InvalidArgument("no command has been executed in this container".to_string())
        })
    }

    async fn resolve(&self) -> Result<Resolved> {
        let mut pending = Vec::new();
        let mut base = None;
        let mut cursor = Some(Arc::clone(&self.layer));
        while let Some(layer) = cursor {
            if let Some(done) = layer.resolved.get() {
                base = Some(done.clone());
                break;
            }
            cursor = layer.parent.clone();
            pending.push(layer);
        }

        let mut current = base.unwrap_or_else(Resolved::scratch);
        for layer in pending.into_iter().rev() {
            let parent = current;
            current = layer
                .resolved
                .get_or_try_init(|| self.apply(&layer.op, parent))
                .await?
                .clone();
        }
        Ok(current)
    }

    async fn apply(&self, op: &Op, parent: Resolved) -> Result<Resolved> {
        let runtime = &self.client.runtime;
        match op {
            Op::Scratch => Ok(parent),
            Op::From(image) => {
                tracing::debug!(image = %image, runtime = runtime.name(), "resolving base image");
                let snapshot = runtime.from_image(image).await?;
                Ok(Resolved {
                    snapshot: Some(snapshot),
                    workdir: parent.workdir,
                    last_exec: None,
                })
            }
            Op::WithDirectory { path, source } => {
                let path = resolve_path(&parent.workdir, path);
                let snapshot = runtime
                    .with_directory(parent.snapshot()?, &path, source)
                    .await?;
                Ok(Resolved {
                    snapshot: Some(snapshot),
                    ..parent
                })
            }
            Op::WithWorkdir(dir) => Ok(Resolved {
                workdir: resolve_path(&parent.workdir, dir),
                ..parent
            }),
            Op::WithExec { args, expect } => {
                if args.is_empty() {
                    return Err(Error::InvalidArgument(
                        "exec requires at least one argument".to_string(),
                    ));
                }
                tracing::debug!(args = ?args, workdir = %parent.workdir, "executing command");
                let result = runtime
                    .exec(parent.snapshot()?, &parent.workdir, args)
                    .await?;
                if !expect.accepts(result.output.exit_code) {
                    return Err(Error::ExecFailed {
                        args: args.clone(),
                        exit_code: result.output.exit_code,
                        stderr: result.output.stderr,
                    });
                }
                Ok(Resolved {
                    snapshot: Some(result.snapshot),
                    workdir: parent.workdir,
                    last_exec: Some(result.output),
                })
            }
            Op::WithNewFile { path, contents } => {
                let path = resolve_path(&parent.workdir, path);
                let snapshot = runtime
                    .with_new_file(parent.snapshot()?, &path, contents)
                    .await?;
                Ok(Resolved {
                    snapshot: Some(snapshot),
                    ..parent
                })
            }
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops = Vec::new();
        let mut cursor = Some(&self.layer);
        while let Some(layer) = cursor {
            ops.push(layer.op.to_string());
            cursor = layer.parent.as_ref();
        }
        ops.reverse();
        f.debug_struct("Container")
            .field("runtime", &self.client.runtime_name())
            .field("layers", &ops)
            .finish()
    }
}

/// Joins `path` onto `workdir` unless it is already absolute, then
/// normalizes `.` and `..` segments.
pub fn resolve_path(workdir: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}
