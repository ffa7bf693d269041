//! Container sandbox for workspaces.
//!
//! This module provides the [`ContainerRuntime`] trait for materializing
//! container snapshots, the lazily evaluated [`Container`] handle built on
//! top of it, and two runtimes: [`DockerRuntime`] driving the docker CLI and
//! [`MemoryRuntime`] keeping everything in process.

mod container;
mod docker;
mod memory;
mod provider;

pub use container::{resolve_path, Client, Container, SourceTree};
pub use docker::DockerRuntime;
pub use memory::{CommandHandler, ExecRequest, MemoryFs, MemoryRuntime};
pub use provider::{ContainerRuntime, ExecOutput, ExecResult, ReturnType, SnapshotId};
