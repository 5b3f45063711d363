//! Space reclamation actions.
//!
//! Two independent actions, each tied to one monitored path:
//! - Container runtime pruning for the runtime data root
//! - Workspace wipe for the build workspace root
//!
//! Both are safe to skip and safe to repeat. Pruning reports failure as a
//! value; wiping never fails outward.

pub mod runtime;
pub mod workspace;

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use runtime::{prune_container_runtime, ContainerRuntime, DockerCli, PruneStep, RuntimeError};
pub use workspace::{wipe_workspace, WipeReport};

/// What a monitored path is reclaimed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimKind {
    /// Prune stopped containers, unused volumes and aged images.
    ContainerRuntime,
    /// Remove everything under the workspace root.
    Workspace,
}

impl std::fmt::Display for ReclaimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReclaimKind::ContainerRuntime => f.write_str("container_runtime"),
            ReclaimKind::Workspace => f.write_str("workspace"),
        }
    }
}

/// A reclamation action failed as a whole.
#[derive(Debug, Error)]
pub enum ReclaimError {
    #[error("container runtime prune failed at {step}: {source}")]
    Prune {
        step: PruneStep,
        #[source]
        source: RuntimeError,
    },
}

/// Result of one reclamation action, as recorded in the iteration report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReclaimOutcome {
    Pruned { bytes_reclaimed: u64 },
    Wiped { removed: usize, failed: usize, recreated: bool },
    Failed { error: String },
}

impl ReclaimOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ReclaimOutcome::Failed { .. })
    }
}

/// Executes reclamation actions.
pub trait Reclaimer: Send + Sync {
    fn prune_container_runtime(&self, retention_hours: u64) -> Result<u64, ReclaimError>;

    fn wipe_workspace(&self, root: &Path) -> WipeReport;

    /// Run the action for `kind` and fold its result into an outcome.
    fn reclaim(&self, kind: ReclaimKind, path: &Path, retention_hours: u64) -> ReclaimOutcome {
        match kind {
            ReclaimKind::ContainerRuntime => match self.prune_container_runtime(retention_hours) {
                Ok(bytes_reclaimed) => ReclaimOutcome::Pruned { bytes_reclaimed },
                Err(err) => ReclaimOutcome::Failed {
                    error: err.to_string(),
                },
            },
            ReclaimKind::Workspace => {
                let report = self.wipe_workspace(path);
                ReclaimOutcome::Wiped {
                    removed: report.removed,
                    failed: report.failed,
                    recreated: report.recreated,
                }
            }
        }
    }
}

/// Reclaims on the local host through a container runtime and the filesystem.
#[derive(Debug)]
pub struct HostReclaimer<R> {
    runtime: R,
}

impl<R: ContainerRuntime> HostReclaimer<R> {
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }
}

impl<R: ContainerRuntime> Reclaimer for HostReclaimer<R> {
    fn prune_container_runtime(&self, retention_hours: u64) -> Result<u64, ReclaimError> {
        prune_container_runtime(&self.runtime, retention_hours)
    }

    fn wipe_workspace(&self, root: &Path) -> WipeReport {
        wipe_workspace(root)
    }
}

/// A monitored path and the action that reclaims it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchTarget {
    pub kind: ReclaimKind,
    pub path: PathBuf,
}

impl WatchTarget {
    pub fn new(kind: ReclaimKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// The runtime root and workspace root from settings, in that order.
    pub fn from_settings(watch: &dw_config::WatchSettings) -> Vec<WatchTarget> {
        vec![
            WatchTarget::new(ReclaimKind::ContainerRuntime, &watch.runtime_root),
            WatchTarget::new(ReclaimKind::Workspace, &watch.workspace_root),
        ]
    }
}
