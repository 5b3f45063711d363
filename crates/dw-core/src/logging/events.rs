//! Structured event vocabulary.
//!
//! Every watchdog log line carries an event name, a stage, and the
//! correlation IDs of the running process.

use serde::{Deserialize, Serialize};

/// Phases of a watchdog iteration, plus process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Disk usage sampling.
    Sample,
    /// Scheduler admission (taking the node offline).
    Admit,
    /// Space reclamation.
    Reclaim,
    /// Returning the node to rotation.
    Restore,
    /// Out-of-band termination handling.
    Signal,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Sample => "sample",
            Stage::Admit => "admit",
            Stage::Reclaim => "reclaim",
            Stage::Restore => "restore",
            Stage::Signal => "signal",
        };
        f.write_str(s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_STOPPED: &str = "run.stopped";

    pub const ITERATION_STARTED: &str = "iteration.started";
    pub const ITERATION_FINISHED: &str = "iteration.finished";
    pub const ITERATION_FAILED: &str = "iteration.failed";

    pub const SAMPLE_TAKEN: &str = "sample.taken";

    pub const ADMIT_CHECKING: &str = "admit.checking";
    pub const ADMIT_GRANTED: &str = "admit.granted";
    pub const ADMIT_DENIED: &str = "admit.denied";

    pub const RECLAIM_STARTED: &str = "reclaim.started";
    pub const RECLAIM_STEP: &str = "reclaim.step";
    pub const RECLAIM_FAILED: &str = "reclaim.failed";
    pub const RECLAIM_FINISHED: &str = "reclaim.finished";

    pub const RESTORE_REQUESTED: &str = "restore.requested";
    pub const RESTORE_FINISHED: &str = "restore.finished";
    pub const RESTORE_FAILED: &str = "restore.failed";

    pub const SIGNAL_RECEIVED: &str = "signal.received";
    pub const SIGNAL_FORCED_RESTORE: &str = "signal.forced_restore";

    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_ERROR: &str = "config.error";
}

/// Correlation context shared by every event this process emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogContext {
    pub run_id: String,
    pub host_id: String,
    /// Scheduler node this watchdog maintains.
    pub node: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
            node: String::new(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    /// Root span for the process; fields are inherited by every event.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "diskwatch",
            run_id = %self.run_id,
            host_id = %self.host_id,
            node = %self.node,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_serialization() {
        assert_eq!(serde_json::to_string(&Stage::Reclaim).unwrap(), "\"reclaim\"");
        assert_eq!(Stage::Restore.to_string(), "restore");
    }

    #[test]
    fn test_context_builder() {
        let ctx = LogContext::new("run-abc", "host-1234").with_node("agent-7");
        assert_eq!(ctx.run_id, "run-abc");
        assert_eq!(ctx.node, "agent-7");
    }
}
