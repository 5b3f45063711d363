//! Container runtime pruning through the `docker` CLI.
//!
//! Three prunes run in order and stop at the first failure:
//! 1. stopped containers
//! 2. unused volumes
//! 3. images unused for longer than the retention window (dangling or not)
//!
//! Each prune prints a `Total reclaimed space: <size>` summary which is the
//! only part of the output we rely on.

use std::time::Duration;

use dw_config::RuntimeSettings;
use serde::Serialize;
use thiserror::Error;

use super::ReclaimError;
use crate::log_event;
use crate::logging::{event_names, Stage};
use crate::tool_runner::{ToolError, ToolRunner, ToolSpec};

const SUMMARY_PREFIX: &str = "Total reclaimed space:";

/// One of the three prune sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneStep {
    Containers,
    Volumes,
    Images,
}

impl std::fmt::Display for PruneStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PruneStep::Containers => f.write_str("containers"),
            PruneStep::Volumes => f.write_str("volumes"),
            PruneStep::Images => f.write_str("images"),
        }
    }
}

/// A single prune call failed.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{command} exited with {code:?}: {stderr}")]
    ExitStatus {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("no reclaimed-space summary in output of {command}")]
    MissingSummary { command: String },

    #[error("cannot parse size {0:?}")]
    BadSize(String),
}

/// The prune verbs of a container runtime. Each returns bytes reclaimed.
pub trait ContainerRuntime: Send + Sync {
    fn prune_containers(&self) -> Result<u64, RuntimeError>;
    fn prune_volumes(&self) -> Result<u64, RuntimeError>;
    /// Remove every image not used by a container and older than `hours`.
    fn prune_images(&self, older_than_hours: u64) -> Result<u64, RuntimeError>;
}

/// Drives the `docker` binary against an explicit daemon address.
#[derive(Debug, Clone)]
pub struct DockerCli {
    runner: ToolRunner,
    binary: String,
    host_url: String,
    api_version: String,
}

impl DockerCli {
    pub fn connect(host_url: impl Into<String>, api_version: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner: ToolRunner::new(timeout),
            binary: "docker".to_string(),
            host_url: host_url.into(),
            api_version: api_version.into(),
        }
    }

    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self::connect(&settings.host_url, &settings.api_version, settings.timeout())
    }

    /// Use a different client binary (absolute path or name on `PATH`).
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn prune(&self, args: &[&str]) -> Result<u64, RuntimeError> {
        let mut full = vec!["--host", self.host_url.as_str()];
        full.extend_from_slice(args);
        let spec = ToolSpec::new(&self.binary, full).with_env("DOCKER_API_VERSION", &self.api_version);

        let output = self.runner.run(&spec)?;
        if !output.success() {
            return Err(RuntimeError::ExitStatus {
                command: spec.display(),
                code: output.exit_code,
                stderr: output.stderr_str().trim().to_string(),
            });
        }
        match parse_reclaimed_bytes(&output.stdout_str()) {
            Some(parsed) => parsed,
            None => Err(RuntimeError::MissingSummary {
                command: spec.display(),
            }),
        }
    }
}

impl ContainerRuntime for DockerCli {
    fn prune_containers(&self) -> Result<u64, RuntimeError> {
        self.prune(&["container", "prune", "--force"])
    }

    fn prune_volumes(&self) -> Result<u64, RuntimeError> {
        self.prune(&["volume", "prune", "--force"])
    }

    fn prune_images(&self, older_than_hours: u64) -> Result<u64, RuntimeError> {
        let until = format!("until={older_than_hours}h");
        self.prune(&["image", "prune", "--all", "--force", "--filter", &until])
    }
}

/// Find the summary line and convert its size to bytes.
///
/// `None` when there is no summary line at all.
pub fn parse_reclaimed_bytes(output: &str) -> Option<Result<u64, RuntimeError>> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix(SUMMARY_PREFIX))
        .map(|size| parse_size(size.trim()))
}

/// Parse a decimal human size as printed by docker (`0B`, `12.5kB`, `1.02GB`).
pub fn parse_size(raw: &str) -> Result<u64, RuntimeError> {
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| RuntimeError::BadSize(raw.to_string()))?;

    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        "TB" => 1e12,
        "PB" => 1e15,
        _ => return Err(RuntimeError::BadSize(raw.to_string())),
    };
    Ok((value * multiplier).round() as u64)
}

/// Run all three prunes, logging each. Any failing step fails the action.
pub fn prune_container_runtime<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    retention_hours: u64,
) -> Result<u64, ReclaimError> {
    log_event!(
        INFO,
        event_names::RECLAIM_STARTED,
        Stage::Reclaim,
        "pruning container runtime",
        retention_hours = retention_hours
    );

    let mut total = 0u64;
    for step in [PruneStep::Containers, PruneStep::Volumes, PruneStep::Images] {
        let result = match step {
            PruneStep::Containers => runtime.prune_containers(),
            PruneStep::Volumes => runtime.prune_volumes(),
            PruneStep::Images => runtime.prune_images(retention_hours),
        };
        match result {
            Ok(bytes) => {
                log_event!(
                    INFO,
                    event_names::RECLAIM_STEP,
                    Stage::Reclaim,
                    "prune step finished",
                    step = %step,
                    bytes_reclaimed = bytes
                );
                total = total.saturating_add(bytes);
            }
            Err(source) => {
                log_event!(
                    ERROR,
                    event_names::RECLAIM_FAILED,
                    Stage::Reclaim,
                    "prune step failed",
                    step = %step,
                    error = %source
                );
                return Err(ReclaimError::Prune { step, source });
            }
        }
    }

    log_event!(
        INFO,
        event_names::RECLAIM_FINISHED,
        Stage::Reclaim,
        "container runtime pruned",
        bytes_reclaimed = total
    );
    Ok(total)
}
