//! In-process container runtime.
//!
//! Snapshots are plain maps of path to file contents. Commands are served by
//! a small set of built-ins (`apk`, `cat`, `echo`, `true`, `false`, `tree`,
//! `sh -c 'exit N'`) or by handlers registered with
//! [`MemoryRuntime::with_handler`]. Useful for tests and dry runs where no
//! container engine is available.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::container::resolve_path;
use super::provider::{ContainerRuntime, ExecOutput, ExecResult, SnapshotId};

/// Filesystem state of one memory snapshot.
#[derive(Debug, Clone)]
pub struct MemoryFs {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::from(["/".to_string()]),
        }
    }
}

impl MemoryFs {
    /// Returns the contents of a regular file.
    pub fn read(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Creates or overwrites a file, creating parent directories.
    ///
    /// Fails without changing anything if `path` is a directory or one of
    /// its ancestors is a regular file.
    pub fn write(&mut self, path: &str, contents: impl Into<String>) -> Result<()> {
        if self.is_dir(path) {
            return Err(Error::InvalidArgument(format!(
                "cannot write {}: Is a directory",
                path
            )));
        }
        let mut ancestor = parent_of(path);
        while ancestor != "/" {
            if self.files.contains_key(ancestor) {
                return Err(Error::InvalidArgument(format!(
                    "cannot write {}: Not a directory",
                    path
                )));
            }
            ancestor = parent_of(ancestor);
        }

        self.create_dir_all(parent_of(path));
        self.files.insert(path.to_string(), contents.into());
        Ok(())
    }

    /// Creates a directory and all of its parents.
    pub fn create_dir_all(&mut self, path: &str) {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    /// Returns true if `path` is a known directory.
    pub fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// Iterates over all file paths in sorted order.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// A command invocation handed to an exec handler.
#[derive(Debug, Clone, Copy)]
pub struct ExecRequest<'a> {
    /// Working directory of the command.
    pub workdir: &'a str,
    /// Full argv, program first.
    pub args: &'a [String],
}

/// Custom command implementation for the memory runtime.
pub type CommandHandler = Arc<dyn Fn(&mut MemoryFs, ExecRequest<'_>) -> ExecOutput + Send + Sync>;

/// Container runtime that keeps every snapshot in memory.
pub struct MemoryRuntime {
    snapshots: Mutex<HashMap<SnapshotId, MemoryFs>>,
    handlers: HashMap<String, CommandHandler>,
    executed: Mutex<Vec<Vec<String>>>,
    unavailable: AtomicBool,
    counter: AtomicU64,
}

impl Default for MemoryRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRuntime {
    /// Creates an empty runtime with only the built-in commands.
    pub fn new() -> Self {
        Self {
            snapshots: Mutex::new(HashMap::new()),
            handlers: HashMap::new(),
            executed: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    /// Registers a handler for `program`, taking precedence over built-ins.
    pub fn with_handler<F>(mut self, program: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut MemoryFs, ExecRequest<'_>) -> ExecOutput + Send + Sync + 'static,
    {
        self.handlers.insert(program.into(), Arc::new(handler));
        self
    }

    /// Returns every argv executed so far, in order.
    pub fn executed(&self) -> Vec<Vec<String>> {
        lock(&self.executed).clone()
    }

    /// Makes every later runtime call fail as if the engine went away.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Runtime("memory runtime is unavailable".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, id: &SnapshotId) -> Result<MemoryFs> {
        lock(&self.snapshots)
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Runtime(format!("unknown snapshot {}", id)))
    }

    fn store(&self, fs: MemoryFs) -> SnapshotId {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = SnapshotId::new(format!("mem-{}", id));
        lock(&self.snapshots).insert(id.clone(), fs);
        id
    }

    fn run(&self, fs: &mut MemoryFs, request: ExecRequest<'_>) -> ExecOutput {
        let program = request.args[0].as_str();
        if let Some(handler) = self.handlers.get(program) {
            return handler(fs, request);
        }
        builtin(fs, request).unwrap_or_else(|| ExecOutput {
            exit_code: 127,
            stdout: String::new(),
            stderr: format!("sh: {}: not found\n", program),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &str {
        "memory"
    }

    async fn from_image(&self, image: &str) -> Result<SnapshotId> {
        self.check_available()?;
        tracing::debug!(image = %image, "creating memory snapshot");
        Ok(self.store(MemoryFs::default()))
    }

    async fn with_directory(
        &self,
        base: &SnapshotId,
        path: &str,
        source: &Path,
    ) -> Result<SnapshotId> {
        self.check_available()?;
        if !source.is_dir() {
            return Err(Error::InvalidSource(source.to_path_buf()));
        }

        let mut fs = self.snapshot(base)?;
        if fs.read(path).is_some() {
            return Err(Error::InvalidArgument(format!(
                "cannot copy into {}: Not a directory",
                path
            )));
        }
        fs.create_dir_all(path);
        for entry in WalkDir::new(source).sort_by(|a, b| a.path().cmp(b.path())) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let Ok(relative) = entry.path().strip_prefix(source) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            let target = resolve_path(path, &relative.to_string_lossy());
            if entry.file_type().is_dir() {
                fs.create_dir_all(&target);
            } else if entry.file_type().is_file() {
                let bytes = std::fs::read(entry.path())?;
                fs.write(&target, String::from_utf8_lossy(&bytes))?;
            }
        }
        Ok(self.store(fs))
    }

    async fn with_new_file(
        &self,
        base: &SnapshotId,
        path: &str,
        contents: &str,
    ) -> Result<SnapshotId> {
        self.check_available()?;
        let mut fs = self.snapshot(base)?;
        fs.write(path, contents)?;
        Ok(self.store(fs))
    }

    async fn exec(&self, base: &SnapshotId, workdir: &str, args: &[String]) -> Result<ExecResult> {
        self.check_available()?;
        if args.is_empty() {
            return Err(Error::InvalidArgument("empty command".to_string()));
        }
        let mut fs = self.snapshot(base)?;
        lock(&self.executed).push(args.to_vec());

        let output = self.run(&mut fs, ExecRequest { workdir, args });
        tracing::debug!(args = ?args, exit_code = output.exit_code, "memory exec finished");

        Ok(ExecResult {
            snapshot: self.store(fs),
            output,
        })
    }

    async fn file_contents(&self, base: &SnapshotId, path: &str) -> Result<String> {
        self.check_available()?;
        let fs = self.snapshot(base)?;
        fs.read(path)
            .map(str::to_string)
            .ok_or_else(|| Error::FileNotFound {
                path: path.to_string(),
            })
    }
}

fn exit(code: i32) -> ExecOutput {
    ExecOutput {
        exit_code: code,
        ..Default::default()
    }
}

fn builtin(fs: &mut MemoryFs, request: ExecRequest<'_>) -> Option<ExecOutput> {
    let args = request.args;
    let output = match args[0].as_str() {
        "true" => exit(0),
        "false" => exit(1),
        "echo" => ExecOutput {
            exit_code: 0,
            stdout: format!("{}\n", args[1..].join(" ")),
            stderr: String::new(),
        },
        "cat" => cat(fs, request),
        "apk" => apk(fs, args),
        "tree" => tree(fs, request),
        "sh" => match (args.get(1).map(String::as_str), args.get(2)) {
            (Some("-c"), Some(script)) => {
                let code = script.trim().strip_prefix("exit")?.trim().parse().ok()?;
                exit(code)
            }
            _ => return None,
        },
        _ => return None,
    };
    Some(output)
}

fn cat(fs: &MemoryFs, request: ExecRequest<'_>) -> ExecOutput {
    let mut output = exit(0);
    for arg in &request.args[1..] {
        let path = resolve_path(request.workdir, arg);
        match fs.read(&path) {
            Some(contents) => output.stdout.push_str(contents),
            None => {
                output.exit_code = 1;
                output.stderr.push_str(&format!(
                    "cat: can't open '{}': No such file or directory\n",
                    arg
                ));
            }
        }
    }
    output
}

const APK_WORLD: &str = "/etc/apk/world";

fn apk(fs: &mut MemoryFs, args: &[String]) -> ExecOutput {
    if args.get(1).map(String::as_str) != Some("add") {
        return ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "apk: only 'add' is supported\n".to_string(),
        };
    }

    let mut world: BTreeSet<String> = fs
        .read(APK_WORLD)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    world.extend(
        args[2..]
            .iter()
            .filter(|arg| !arg.starts_with('-'))
            .cloned(),
    );

    let mut contents = world.iter().cloned().collect::<Vec<_>>().join("\n");
    contents.push('\n');
    if let Err(e) = fs.write(APK_WORLD, contents) {
        return ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("apk: {}\n", e),
        };
    }

    ExecOutput {
        exit_code: 0,
        stdout: format!("OK: {} packages installed\n", world.len()),
        stderr: String::new(),
    }
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    is_dir: bool,
}

impl TreeNode {
    fn insert(&mut self, relative: &str, is_dir: bool) {
        let mut node = self;
        let mut segments = relative.split('/').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            node = node.children.entry(segment.to_string()).or_default();
            if segments.peek().is_some() || is_dir {
                node.is_dir = true;
            }
        }
    }

    fn render(&self, prefix: &str, out: &mut String, counts: &mut (usize, usize)) {
        let last = self.children.len().saturating_sub(1);
        for (idx, (name, child)) in self.children.iter().enumerate() {
            let (branch, indent) = if idx == last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            out.push_str(&format!("{}{}{}\n", prefix, branch, name));
            if child.is_dir {
                counts.0 += 1;
                child.render(&format!("{}{}", prefix, indent), out, counts);
            } else {
                counts.1 += 1;
            }
        }
    }
}

fn tree(fs: &MemoryFs, request: ExecRequest<'_>) -> ExecOutput {
    let label = request.args.get(1).map(String::as_str).unwrap_or(".");
    let root = resolve_path(request.workdir, label);
    if !fs.is_dir(&root) {
        return ExecOutput {
            exit_code: 2,
            stdout: format!("{} [error opening dir]\n\n0 directories, 0 files\n", label),
            stderr: String::new(),
        };
    }

    let prefix = if root == "/" {
        "/".to_string()
    } else {
        format!("{}/", root)
    };
    let mut top = TreeNode::default();
    for dir in fs.dirs.iter().filter_map(|d| d.strip_prefix(&prefix)) {
        top.insert(dir, true);
    }
    for file in fs.files().filter_map(|f| f.strip_prefix(&prefix)) {
        top.insert(file, false);
    }

    let mut out = format!("{}\n", label);
    let mut counts = (0, 0);
    top.render("", &mut out, &mut counts);
    let (dirs, files) = counts;
    out.push_str(&format!(
        "\n{} {}, {} {}\n",
        dirs,
        if dirs == 1 { "directory" } else { "directories" },
        files,
        if files == 1 { "file" } else { "files" }
    ));

    ExecOutput {
        exit_code: 0,
        stdout: out,
        stderr: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn with_directory_loads_host_files() {
        let source = TempDir::new().unwrap();
        std::fs::write(source.path().join("a.txt"), "alpha").unwrap();
        std::fs::create_dir(source.path().join("dir")).unwrap();
        std::fs::write(source.path().join("dir/b.txt"), "beta").unwrap();

        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();
        let snap = runtime
            .with_directory(&base, "/workspace", source.path())
            .await
            .unwrap();

        assert_eq!(
            runtime.file_contents(&snap, "/workspace/dir/b.txt").await.unwrap(),
            "beta"
        );
        assert!(runtime.file_contents(&base, "/workspace/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn with_directory_rejects_missing_source() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();

        let err = runtime
            .with_directory(&base, "/workspace", Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSource(_)));
    }

    #[tokio::test]
    async fn unknown_program_exits_127() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();

        let result = runtime.exec(&base, "/", &argv(&["cargo", "build"])).await.unwrap();
        assert_eq!(result.output.exit_code, 127);
        assert!(result.output.stderr.contains("cargo: not found"));
    }

    #[tokio::test]
    async fn apk_add_records_world() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();

        let result = runtime
            .exec(&base, "/", &argv(&["apk", "add", "--no-cache", "git", "python3"]))
            .await
            .unwrap();
        let world = runtime.file_contents(&result.snapshot, APK_WORLD).await.unwrap();

        assert_eq!(world, "git\npython3\n");
    }

    #[tokio::test]
    async fn sh_exit_returns_requested_code() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();

        let result = runtime
            .exec(&base, "/", &argv(&["sh", "-c", "exit 42"]))
            .await
            .unwrap();
        assert_eq!(result.output.exit_code, 42);
    }

    #[tokio::test]
    async fn handlers_override_builtins() {
        let runtime = MemoryRuntime::new().with_handler("echo", |_, _| ExecOutput {
            exit_code: 9,
            stdout: "custom".to_string(),
            stderr: String::new(),
        });
        let base = runtime.from_image("alpine:3").await.unwrap();

        let result = runtime.exec(&base, "/", &argv(&["echo", "x"])).await.unwrap();
        assert_eq!(result.output.exit_code, 9);
        assert_eq!(result.output.stdout, "custom");
    }

    #[test]
    fn tree_renders_nested_entries() {
        let mut fs = MemoryFs::default();
        fs.create_dir_all("/workspace");
        fs.write("/workspace/a.txt", "").unwrap();
        fs.write("/workspace/dir/b.txt", "").unwrap();
        let args = argv(&["tree", "."]);

        let output = tree(
            &fs,
            ExecRequest {
                workdir: "/workspace",
                args: &args,
            },
        );

        assert_eq!(
            output.stdout,
            ".\n├── a.txt\n└── dir\n    └── b.txt\n\n1 directory, 2 files\n"
        );
    }

    #[tokio::test]
    async fn unavailable_runtime_fails_every_call() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();
        runtime.set_unavailable(true);

        assert!(matches!(
            runtime.file_contents(&base, "/x").await,
            Err(Error::Runtime(_))
        ));
        assert!(matches!(
            runtime.exec(&base, "/", &argv(&["true"])).await,
            Err(Error::Runtime(_))
        ));
    }

    #[test]
    fn write_refuses_directories_and_file_ancestors() {
        let mut fs = MemoryFs::default();
        fs.create_dir_all("/workspace/dir");
        fs.write("/workspace/a.txt", "alpha").unwrap();

        assert!(matches!(
            fs.write("/workspace/dir", "x"),
            Err(Error::InvalidArgument(msg)) if msg.contains("Is a directory")
        ));
        assert!(fs.write("/workspace", "x").is_err());
        assert!(matches!(
            fs.write("/workspace/a.txt/nested", "x"),
            Err(Error::InvalidArgument(msg)) if msg.contains("Not a directory")
        ));
        assert_eq!(fs.read("/workspace/dir"), None);
        assert_eq!(fs.read("/workspace/a.txt"), Some("alpha"));
        assert!(!fs.is_dir("/workspace/a.txt"));
    }

    #[tokio::test]
    async fn with_new_file_on_directory_is_recoverable() {
        let runtime = MemoryRuntime::new();
        let base = runtime.from_image("alpine:3").await.unwrap();
        let snap = runtime
            .with_new_file(&base, "/workspace/a.txt", "alpha")
            .await
            .unwrap();

        let err = runtime
            .with_new_file(&snap, "/workspace", "clobber")
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            runtime.file_contents(&snap, "/workspace").await,
            Err(Error::FileNotFound { .. })
        ));
    }

    #[test]
    fn parent_of_handles_root_children() {
        assert_eq!(parent_of("/a.txt"), "/");
        assert_eq!(parent_of("/etc/apk/world"), "/etc/apk");
    }
}
