use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Where the current iteration stands with respect to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceStage {
    /// No obligation: the node has not been taken offline this iteration.
    Idle,
    /// Offline confirmed, reclamation not yet started.
    OfflinePending,
    /// Reclamation running on an offline node.
    Offline,
    /// Restoration requested, or requested and failed.
    Restoring,
    /// A termination signal took over; terminal for the process.
    ShuttingDown,
}

impl MaintenanceStage {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::OfflinePending => 1,
            Self::Offline => 2,
            Self::Restoring => 3,
            Self::ShuttingDown => 4,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::OfflinePending,
            2 => Self::Offline,
            3 => Self::Restoring,
            4 => Self::ShuttingDown,
            _ => Self::Idle,
        }
    }

    /// Whether the node may be offline because of us.
    pub fn owes_restore(self) -> bool {
        matches!(self, Self::OfflinePending | Self::Offline | Self::Restoring)
    }
}

impl std::fmt::Display for MaintenanceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::OfflinePending => "offline_pending",
            Self::Offline => "offline",
            Self::Restoring => "restoring",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Stage shared between the poll loop and the signal listener.
///
/// Once the listener has called [`StageCell::begin_shutdown`] the stage is
/// pinned at `ShuttingDown`: later `set`/`reset` calls from the poll loop
/// are refused, so the listener alone owns the final restoration.
#[derive(Debug, Clone, Default)]
pub struct StageCell(Arc<AtomicU8>);

impl StageCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> MaintenanceStage {
        MaintenanceStage::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `stage`. Returns false when shutdown has already begun.
    pub fn set(&self, stage: MaintenanceStage) -> bool {
        let pinned = MaintenanceStage::ShuttingDown.as_u8();
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != pinned).then_some(stage.as_u8())
            })
            .is_ok()
    }

    pub fn reset(&self) -> bool {
        self.set(MaintenanceStage::Idle)
    }

    /// Pin the stage at `ShuttingDown` and return what it was.
    pub fn begin_shutdown(&self) -> MaintenanceStage {
        MaintenanceStage::from_u8(
            self.0
                .swap(MaintenanceStage::ShuttingDown.as_u8(), Ordering::AcqRel),
        )
    }

    pub fn is_shutting_down(&self) -> bool {
        self.get() == MaintenanceStage::ShuttingDown
    }
}
