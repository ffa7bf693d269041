//! Container runtime trait and types.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque reference to an immutable container filesystem state.
///
/// For the Docker runtime this is an image id; the memory runtime uses
/// generated identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Captured result of one command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit status of the command.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Output of a runtime exec together with the snapshot it produced.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Filesystem state after the command ran.
    pub snapshot: SnapshotId,
    /// What the command printed and returned.
    pub output: ExecOutput,
}

/// Which exit statuses an exec layer accepts without failing resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReturnType {
    /// Only exit status zero.
    #[default]
    Success,
    /// Only non-zero exit statuses.
    Failure,
    /// Any exit status; the caller inspects it explicitly.
    Any,
}

impl ReturnType {
    /// Returns true if `exit_code` satisfies this expectation.
    pub fn accepts(self, exit_code: i32) -> bool {
        match self {
            ReturnType::Success => exit_code == 0,
            ReturnType::Failure => exit_code != 0,
            ReturnType::Any => true,
        }
    }
}

/// Backend that materializes container snapshots.
///
/// Every method takes an existing snapshot and returns a new one; snapshots
/// are never modified in place.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the name of this runtime.
    fn name(&self) -> &str;

    /// Resolves a base image into a snapshot.
    async fn from_image(&self, image: &str) -> Result<SnapshotId>;

    /// Copies a host directory into the snapshot at `path`.
    async fn with_directory(
        &self,
        base: &SnapshotId,
        path: &str,
        source: &Path,
    ) -> Result<SnapshotId>;

    /// Creates or overwrites a file at `path`.
    async fn with_new_file(&self, base: &SnapshotId, path: &str, contents: &str)
        -> Result<SnapshotId>;

    /// Runs `args` with `workdir` as the working directory.
    ///
    /// A non-zero exit status is not an error here; `Err` means the runtime
    /// itself failed.
    async fn exec(&self, base: &SnapshotId, workdir: &str, args: &[String]) -> Result<ExecResult>;

    /// Reads a regular file.
    async fn file_contents(&self, base: &SnapshotId, path: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_type_defaults_to_success() {
        assert_eq!(ReturnType::default(), ReturnType::Success);
    }

    #[test]
    fn return_type_accepts_matching_exit_codes() {
        assert!(ReturnType::Success.accepts(0));
        assert!(!ReturnType::Success.accepts(2));
        assert!(ReturnType::Failure.accepts(2));
        assert!(!ReturnType::Failure.accepts(0));
        assert!(ReturnType::Any.accepts(0));
        assert!(ReturnType::Any.accepts(127));
    }

    #[test]
    fn return_type_serializes_to_lowercase() {
        assert_eq!(serde_json::to_string(&ReturnType::Any).unwrap(), "\"any\"");
        assert_eq!(
            serde_json::to_string(&ReturnType::Success).unwrap(),
            "\"success\""
        );
    }
}
