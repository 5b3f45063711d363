//! Maintenance orchestrator.
//!
//! One iteration:
//! 1. reset the stage to idle
//! 2. sample every monitored path
//! 3. nothing critical: done, the scheduler is never contacted
//! 4. ask the scheduler to take the node offline; busy means done
//! 5. run the reclamation action of every critical path
//! 6. re-sample (logged only), then bring the node back online
//!
//! Once `take_offline` has returned true, step 6's restoration runs exactly
//! once before the iteration returns, whether the actions fail or panic.
//! [`RestoreGuard`] carries that obligation. When a termination signal has
//! pinned the stage, the listener owns restoration instead: no further action
//! starts and the guard stands down.

pub mod signals;
pub mod stage;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dw_config::Settings;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::log_event;
use crate::logging::{event_names, Stage};
use crate::reclaim::{ReclaimKind, ReclaimOutcome, Reclaimer, WatchTarget};
use crate::sample::{sample, DiskProbe, SampleError, UsageSample};
use crate::scheduler::{NodeController, SchedulerError};

pub use signals::{handle_termination, SignalListener};
pub use stage::{MaintenanceStage, StageCell};

/// Errors that end an iteration early. Caught by the poll loop.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("sampling failed: {0}")]
    Sample(#[from] SampleError),

    #[error("could not take node offline: {0}")]
    Admission(#[from] SchedulerError),
}

impl WatchdogError {
    /// Whether the next iteration could plausibly succeed without operator
    /// action.
    pub fn is_transient(&self) -> bool {
        match self {
            WatchdogError::Sample(_) => false,
            WatchdogError::Admission(err) => err.is_transient(),
        }
    }
}

/// What happened when the node was asked to leave rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Nothing was critical; the scheduler was not contacted.
    NotNeeded,
    /// The node was running a job and was left alone.
    Deferred,
    /// The node is offline and owes a restoration.
    Granted,
    /// Dry run: maintenance would have been requested.
    Skipped,
}

/// Outcome of one reclamation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionRecord {
    pub kind: ReclaimKind,
    pub path: std::path::PathBuf,
    pub outcome: ReclaimOutcome,
}

/// Outcome of the restoration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Restoration {
    Restored,
    Failed { error: String },
    /// The signal listener took over and restores the node itself.
    HandedOver,
}

/// Everything one iteration observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub iteration: u64,
    pub started_at: DateTime<Utc>,
    pub samples: Vec<UsageSample>,
    pub admission: Admission,
    pub actions: Vec<ActionRecord>,
    /// Re-read after reclamation. Never used for decisions.
    pub post_samples: Vec<UsageSample>,
    pub restoration: Option<Restoration>,
}

impl IterationReport {
    pub fn critical_paths(&self) -> impl Iterator<Item = &UsageSample> {
        self.samples.iter().filter(|s| s.critical)
    }
}

/// Process-lifetime counters. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchdogStats {
    pub iterations: u64,
    pub failed_iterations: u64,
    pub maintenance_windows: u64,
    pub deferrals: u64,
    pub failed_actions: u64,
    pub failed_restorations: u64,
}

/// Re-enables the node when dropped unless [`RestoreGuard::restore`] ran.
///
/// Dropping during a panic still restores.
struct RestoreGuard<'a> {
    controller: &'a dyn NodeController,
    stage: &'a StageCell,
    armed: bool,
}

impl<'a> RestoreGuard<'a> {
    /// Record the obligation in the stage. `None` when shutdown was pinned
    /// first, in which case the listener never saw the obligation.
    fn arm(controller: &'a dyn NodeController, stage: &'a StageCell) -> Option<Self> {
        stage.set(MaintenanceStage::OfflinePending).then_some(Self {
            controller,
            stage,
            armed: true,
        })
    }

    fn restore(mut self) -> Restoration {
        self.armed = false;
        restore_node(self.controller, self.stage)
    }
}

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            warn!(node = %self.controller.node(), "maintenance aborted, restoring node");
            let _ = restore_node(self.controller, self.stage);
        }
    }
}

fn restore_node(controller: &dyn NodeController, stage: &StageCell) -> Restoration {
    if !stage.set(MaintenanceStage::Restoring) {
        warn!(node = %controller.node(), "signal listener is restoring the node");
        return Restoration::HandedOver;
    }
    match controller.bring_online() {
        Ok(_) => {
            stage.reset();
            Restoration::Restored
        }
        Err(err) => {
            // Stage stays at Restoring so a signal before the next
            // iteration retries the restore.
            log_event!(
                CRITICAL,
                event_names::RESTORE_FAILED,
                Stage::Restore,
                "could not bring node back online, will retry next iteration",
                node = %controller.node(),
                error = %err
            );
            Restoration::Failed {
                error: err.to_string(),
            }
        }
    }
}

/// The disk-pressure control loop for one node.
pub struct Watchdog {
    targets: Vec<WatchTarget>,
    threshold: u8,
    retention_hours: u64,
    interval: Duration,
    dry_run: bool,
    probe: Arc<dyn DiskProbe>,
    controller: Arc<dyn NodeController>,
    reclaimer: Arc<dyn Reclaimer>,
    stage: StageCell,
    stats: WatchdogStats,
}

impl Watchdog {
    pub fn new(
        settings: &Settings,
        probe: Arc<dyn DiskProbe>,
        controller: Arc<dyn NodeController>,
        reclaimer: Arc<dyn Reclaimer>,
    ) -> Self {
        Self {
            targets: WatchTarget::from_settings(&settings.watch),
            threshold: settings.watch.threshold_percent,
            retention_hours: settings.runtime.retention_hours,
            interval: settings.watch.interval(),
            dry_run: false,
            probe,
            controller,
            reclaimer,
            stage: StageCell::new(),
            stats: WatchdogStats::default(),
        }
    }

    /// Sample and report only; never contact the scheduler or reclaim.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// The stage shared with the signal listener.
    pub fn stage(&self) -> StageCell {
        self.stage.clone()
    }

    pub fn controller(&self) -> Arc<dyn NodeController> {
        Arc::clone(&self.controller)
    }

    pub fn stats(&self) -> &WatchdogStats {
        &self.stats
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    /// Sample every target once. Used by iterations and the `check` command.
    pub fn sample_all(&self) -> Result<Vec<UsageSample>, SampleError> {
        self.targets
            .iter()
            .map(|target| sample(self.probe.as_ref(), &target.path, self.threshold))
            .collect()
    }

    /// Run one iteration and fold its result into the stats.
    pub fn run_iteration(&mut self) -> Result<IterationReport, WatchdogError> {
        self.stats.iterations += 1;
        let iteration = self.stats.iterations;
        log_event!(
            DEBUG,
            event_names::ITERATION_STARTED,
            Stage::Sample,
            "iteration started",
            iteration = iteration
        );

        let result = self.iterate(iteration);
        match &result {
            Ok(report) => {
                match report.admission {
                    Admission::Granted => self.stats.maintenance_windows += 1,
                    Admission::Deferred => self.stats.deferrals += 1,
                    Admission::NotNeeded | Admission::Skipped => {}
                }
                self.stats.failed_actions +=
                    report.actions.iter().filter(|a| a.outcome.is_failure()).count() as u64;
                if matches!(report.restoration, Some(Restoration::Failed { .. })) {
                    self.stats.failed_restorations += 1;
                }
                log_event!(
                    INFO,
                    event_names::ITERATION_FINISHED,
                    Stage::Restore,
                    "iteration finished",
                    iteration = iteration,
                    admission = ?report.admission,
                    actions = report.actions.len(),
                    maintenance_windows = self.stats.maintenance_windows,
                    deferrals = self.stats.deferrals,
                    failed_restorations = self.stats.failed_restorations
                );
            }
            Err(err) => {
                self.stats.failed_iterations += 1;
                log_event!(
                    ERROR,
                    event_names::ITERATION_FAILED,
                    Stage::Sample,
                    "iteration failed",
                    iteration = iteration,
                    transient = err.is_transient(),
                    error = %err
                );
            }
        }
        result
    }

    fn iterate(&self, iteration: u64) -> Result<IterationReport, WatchdogError> {
        self.stage.reset();

        let mut report = IterationReport {
            iteration,
            started_at: Utc::now(),
            samples: self.sample_all()?,
            admission: Admission::NotNeeded,
            actions: Vec::new(),
            post_samples: Vec::new(),
            restoration: None,
        };

        if report.critical_paths().next().is_none() {
            return Ok(report);
        }

        if self.dry_run {
            for sample in report.critical_paths() {
                log_event!(
                    INFO,
                    event_names::RECLAIM_STARTED,
                    Stage::Reclaim,
                    "dry run: would reclaim",
                    path = %sample.path.display()
                );
            }
            report.admission = Admission::Skipped;
            return Ok(report);
        }

        if self.stage.is_shutting_down() {
            return Ok(report);
        }
        if !self.controller.take_offline()? {
            log_event!(
                WARN,
                event_names::ADMIT_DENIED,
                Stage::Admit,
                "node busy, postponing cleanup to the next iteration",
                node = %self.controller.node()
            );
            report.admission = Admission::Deferred;
            return Ok(report);
        }
        report.admission = Admission::Granted;

        let Some(guard) = RestoreGuard::arm(self.controller.as_ref(), &self.stage) else {
            warn!(node = %self.controller.node(), "shutdown began while going offline, restoring now");
            report.restoration = Some(match self.controller.bring_online() {
                Ok(_) => Restoration::Restored,
                Err(err) => Restoration::Failed {
                    error: err.to_string(),
                },
            });
            return Ok(report);
        };
        self.stage.set(MaintenanceStage::Offline);

        for (target, sample) in self.targets.iter().zip(&report.samples) {
            if !sample.critical {
                continue;
            }
            if self.stage.is_shutting_down() {
                warn!(path = %target.path.display(), "shutting down, skipping remaining reclamation");
                break;
            }
            let outcome = self
                .reclaimer
                .reclaim(target.kind, &target.path, self.retention_hours);
            if let ReclaimOutcome::Failed { error } = &outcome {
                log_event!(
                    ERROR,
                    event_names::RECLAIM_FAILED,
                    Stage::Reclaim,
                    "reclamation failed, continuing",
                    path = %target.path.display(),
                    error = %error
                );
            }
            report.actions.push(ActionRecord {
                kind: target.kind,
                path: target.path.clone(),
                outcome,
            });
        }

        report.post_samples = self.resample();
        report.restoration = Some(guard.restore());
        Ok(report)
    }

    /// Best-effort re-read after reclamation.
    fn resample(&self) -> Vec<UsageSample> {
        self.targets
            .iter()
            .filter_map(|target| {
                match sample(self.probe.as_ref(), &target.path, self.threshold) {
                    Ok(sample) => Some(sample),
                    Err(err) => {
                        warn!(path = %target.path.display(), error = %err, "post-cleanup sample failed");
                        None
                    }
                }
            })
            .collect()
    }

    /// Poll until the process is terminated, or once when `once` is set.
    ///
    /// Iteration failures are logged and never end the loop.
    pub fn run_loop(&mut self, once: bool) -> WatchdogStats {
        log_event!(
            INFO,
            event_names::RUN_STARTED,
            Stage::Init,
            "watchdog started",
            node = %self.controller.node(),
            threshold = self.threshold,
            interval_secs = self.interval.as_secs(),
            dry_run = self.dry_run
        );

        loop {
            let _ = self.run_iteration();
            if once || self.stage.is_shutting_down() {
                break;
            }
            std::thread::sleep(self.interval);
        }

        log_event!(
            INFO,
            event_names::RUN_STOPPED,
            Stage::Init,
            "watchdog stopped",
            iterations = self.stats.iterations,
            maintenance_windows = self.stats.maintenance_windows
        );
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        stage: StageCell,
        seen: std::sync::Mutex<Vec<MaintenanceStage>>,
        online: AtomicUsize,
    }

    impl NodeController for Recorder {
        fn node(&self) -> &str {
            "n"
        }
        fn take_offline(&self) -> Result<bool, SchedulerError> {
            Ok(true)
        }
        fn bring_online(&self) -> Result<bool, SchedulerError> {
            self.seen.lock().unwrap().push(self.stage.get());
            self.online.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let stage = StageCell::new();
        let controller = Recorder {
            stage: stage.clone(),
            seen: Default::default(),
            online: AtomicUsize::new(0),
        };
        {
            let _guard = RestoreGuard::arm(&controller, &stage).unwrap();
            assert_eq!(stage.get(), MaintenanceStage::OfflinePending);
        }
        assert_eq!(controller.online.load(Ordering::SeqCst), 1);
        assert_eq!(*controller.seen.lock().unwrap(), [MaintenanceStage::Restoring]);
        assert_eq!(stage.get(), MaintenanceStage::Idle);
    }

    #[test]
    fn test_explicit_restore_disarms() {
        let stage = StageCell::new();
        let controller = Recorder {
            stage: stage.clone(),
            seen: Default::default(),
            online: AtomicUsize::new(0),
        };
        let guard = RestoreGuard::arm(&controller, &stage).unwrap();
        assert_eq!(guard.restore(), Restoration::Restored);
        assert_eq!(controller.online.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_stands_down_after_shutdown() {
        let stage = StageCell::new();
        let controller = Recorder {
            stage: stage.clone(),
            seen: Default::default(),
            online: AtomicUsize::new(0),
        };
        {
            let guard = RestoreGuard::arm(&controller, &stage).unwrap();
            assert_eq!(stage.begin_shutdown(), MaintenanceStage::OfflinePending);
            assert_eq!(guard.restore(), Restoration::HandedOver);
        }
        assert_eq!(controller.online.load(Ordering::SeqCst), 0);
        assert!(stage.is_shutting_down());
    }

    #[test]
    fn test_arm_refused_once_shutdown_pinned() {
        let stage = StageCell::new();
        let controller = Recorder {
            stage: stage.clone(),
            seen: Default::default(),
            online: AtomicUsize::new(0),
        };
        stage.begin_shutdown();
        assert!(RestoreGuard::arm(&controller, &stage).is_none());
    }
}
