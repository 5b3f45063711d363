//! Job scheduler node control.
//!
//! Two layers:
//! - [`SchedulerClient`]: thin REST verbs against the scheduler
//!   (`node_info`, `disable_node`, `enable_node`).
//! - [`NodeController`]: the admission protocol the watchdog relies on.
//!   A node is only taken offline when the scheduler reports it idle, so
//!   maintenance never aborts an in-flight job.
//!
//! Every controller call opens a fresh client through [`SchedulerConnect`];
//! no connection state survives between calls. Calls on one controller are
//! serialized, because the scheduler's disable and enable verbs read the
//! node state and then post a toggle.

pub mod jenkins;

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::log_event;
use crate::logging::{event_names, Stage};

pub use jenkins::{JenkinsClient, JenkinsEndpoint};

/// Offline message shown in the scheduler UI while maintenance runs.
pub const MAINTENANCE_REASON: &str = "diskwatch: disk cleanup in progress, node will return automatically";

/// Errors talking to the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Unreachable, refused, reset, or timed out.
    #[error("cannot reach scheduler at {url}: {message}")]
    Connection { url: String, message: String },

    #[error("scheduler rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("scheduler returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("unexpected scheduler response: {0}")]
    Protocol(String),
}

impl SchedulerError {
    /// Whether retrying on the next poll could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SchedulerError::Connection { .. } => true,
            SchedulerError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Scheduler-reported node state. Never cached across calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// No job is currently executing on the node.
    pub idle: bool,
    /// The node is disabled for new work.
    pub offline: bool,
}

/// REST verbs of the job scheduler.
pub trait SchedulerClient {
    fn node_info(&self, name: &str) -> Result<NodeInfo, SchedulerError>;
    fn disable_node(&self, name: &str, reason: &str) -> Result<(), SchedulerError>;
    fn enable_node(&self, name: &str) -> Result<(), SchedulerError>;
}

/// Opens scheduler clients.
pub trait SchedulerConnect: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SchedulerClient>, SchedulerError>;
}

/// Takes a single node in and out of rotation.
///
/// Implementations must be safe to call from the signal listener thread
/// while the main loop is inside another call on the same controller.
pub trait NodeController: Send + Sync {
    fn node(&self) -> &str;

    /// Disable the node if, and only if, it is idle.
    ///
    /// `Ok(true)` means the node is now out of rotation and the caller owes a
    /// [`NodeController::bring_online`]. `Ok(false)` means the node was busy
    /// and nothing was changed.
    fn take_offline(&self) -> Result<bool, SchedulerError>;

    /// Re-enable the node. Idempotent.
    fn bring_online(&self) -> Result<bool, SchedulerError>;
}

/// [`NodeController`] over any [`SchedulerConnect`].
#[derive(Debug)]
pub struct SchedulerNodeController<C> {
    connector: C,
    node: String,
    /// Held across each read-then-toggle exchange.
    exchange: Mutex<()>,
}

impl<C: SchedulerConnect> SchedulerNodeController<C> {
    pub fn new(connector: C, node: impl Into<String>) -> Self {
        Self {
            connector,
            node: node.into(),
            exchange: Mutex::new(()),
        }
    }

    fn lock_exchange(&self) -> MutexGuard<'_, ()> {
        // A panicked holder left no state behind the lock.
        self.exchange
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<C: SchedulerConnect> NodeController for SchedulerNodeController<C> {
    fn node(&self) -> &str {
        &self.node
    }

    fn take_offline(&self) -> Result<bool, SchedulerError> {
        log_event!(
            INFO,
            event_names::ADMIT_CHECKING,
            Stage::Admit,
            "checking whether node is idle",
            node = %self.node
        );
        let _exchange = self.lock_exchange();
        let client = self.connector.connect()?;
        let info = client.node_info(&self.node)?;

        if !info.idle {
            log_event!(
                WARN,
                event_names::ADMIT_DENIED,
                Stage::Admit,
                "node is busy, not taking it offline",
                node = %self.node
            );
            return Ok(false);
        }

        if info.offline {
            log_event!(
                WARN,
                event_names::ADMIT_CHECKING,
                Stage::Admit,
                "node is idle but already offline; it will be re-enabled after maintenance",
                node = %self.node
            );
        } else {
            log_event!(
                INFO,
                event_names::ADMIT_CHECKING,
                Stage::Admit,
                "node is idle, requesting disable",
                node = %self.node
            );
        }
        client.disable_node(&self.node, MAINTENANCE_REASON)?;

        log_event!(
            INFO,
            event_names::ADMIT_GRANTED,
            Stage::Admit,
            "node is now offline",
            node = %self.node
        );
        Ok(true)
    }

    fn bring_online(&self) -> Result<bool, SchedulerError> {
        log_event!(
            INFO,
            event_names::RESTORE_REQUESTED,
            Stage::Restore,
            "putting node back online",
            node = %self.node
        );
        let _exchange = self.lock_exchange();
        let client = self.connector.connect()?;
        client.enable_node(&self.node)?;
        log_event!(
            INFO,
            event_names::RESTORE_FINISHED,
            Stage::Restore,
            "node is back online",
            node = %self.node
        );
        Ok(true)
    }
}
