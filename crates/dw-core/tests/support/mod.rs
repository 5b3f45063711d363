//! In-memory collaborators for orchestrator tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use dw_config::Settings;
use dw_core::reclaim::{ReclaimError, Reclaimer, RuntimeError, WipeReport};
use dw_core::reclaim::PruneStep;
use dw_core::sample::{DiskProbe, DiskUsage, SampleError};
use dw_core::scheduler::{NodeController, SchedulerError};

pub const RUNTIME_ROOT: &str = "/srv/docker";
pub const WORKSPACE_ROOT: &str = "/srv/workspace";

/// Settings with threshold 70 and the two roots above.
pub fn settings() -> Settings {
    settings_with_threshold(70)
}

pub fn settings_with_threshold(threshold: u8) -> Settings {
    let vars: HashMap<&str, String> = HashMap::from([
        ("JENKINS_USER", "bot".to_string()),
        ("JENKINS_PASS", "secret".to_string()),
        ("JENKINS_NODE", "agent-1".to_string()),
        ("DISK_THRESHOLD", threshold.to_string()),
        ("DOCKER_ROOT_DIR", RUNTIME_ROOT.to_string()),
        ("WORKSPACE_ROOT_DIR", WORKSPACE_ROOT.to_string()),
    ]);
    Settings::from_lookup(|key| vars.get(key).cloned()).expect("test settings are valid")
}

/// Reports a fixed percentage per path; unknown paths fail like a missing mount.
#[derive(Default)]
pub struct FakeProbe {
    percent: Mutex<HashMap<PathBuf, u8>>,
    pub reads: AtomicUsize,
}

impl FakeProbe {
    pub fn new(runtime: u8, workspace: u8) -> Self {
        let probe = Self::default();
        probe.set(RUNTIME_ROOT, runtime);
        probe.set(WORKSPACE_ROOT, workspace);
        probe
    }

    pub fn set(&self, path: &str, percent: u8) {
        self.percent.lock().unwrap().insert(PathBuf::from(path), percent);
    }

    pub fn forget(&self, path: &str) {
        self.percent.lock().unwrap().remove(Path::new(path));
    }
}

impl DiskProbe for FakeProbe {
    fn usage(&self, path: &Path) -> Result<DiskUsage, SampleError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        match self.percent.lock().unwrap().get(path) {
            Some(&percent) => Ok(DiskUsage {
                total_bytes: 100,
                used_bytes: u64::from(percent),
            }),
            None => Err(SampleError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
        }
    }
}

/// Scheduler stand-in recording every admission and restoration.
#[derive(Default)]
pub struct FakeController {
    pub busy: bool,
    pub fail_offline: bool,
    pub fail_online: bool,
    pub offline_calls: AtomicUsize,
    pub offline_granted: AtomicUsize,
    pub online_calls: AtomicUsize,
}

impl FakeController {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn busy() -> Self {
        Self {
            busy: true,
            ..Self::default()
        }
    }

    pub fn offline_calls(&self) -> usize {
        self.offline_calls.load(Ordering::SeqCst)
    }

    pub fn offline_granted(&self) -> usize {
        self.offline_granted.load(Ordering::SeqCst)
    }

    pub fn online_calls(&self) -> usize {
        self.online_calls.load(Ordering::SeqCst)
    }
}

impl NodeController for FakeController {
    fn node(&self) -> &str {
        "agent-1"
    }

    fn take_offline(&self) -> Result<bool, SchedulerError> {
        self.offline_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_offline {
            return Err(SchedulerError::Connection {
                url: "http://jenkins".into(),
                message: "connection refused".into(),
            });
        }
        if self.busy {
            return Ok(false);
        }
        self.offline_granted.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn bring_online(&self) -> Result<bool, SchedulerError> {
        self.online_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_online {
            return Err(SchedulerError::Status {
                status: 503,
                url: "http://jenkins/computer/agent-1/toggleOffline".into(),
            });
        }
        Ok(true)
    }
}

/// How the fake reclaimer's prune behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PruneBehavior {
    #[default]
    Succeed,
    Fail,
    Panic,
}

/// Reclaimer stand-in counting calls per action.
#[derive(Default)]
pub struct FakeReclaimer {
    pub prune: PruneBehavior,
    pub prune_calls: AtomicUsize,
    pub wipe_calls: Mutex<Vec<PathBuf>>,
    during_prune: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl FakeReclaimer {
    pub fn with_prune(prune: PruneBehavior) -> Self {
        Self {
            prune,
            ..Self::default()
        }
    }

    /// Run `hook` once, in the middle of the next prune.
    pub fn during_prune(self, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.during_prune.lock().unwrap() = Some(Box::new(hook));
        self
    }

    pub fn prune_calls(&self) -> usize {
        self.prune_calls.load(Ordering::SeqCst)
    }

    pub fn wipe_calls(&self) -> usize {
        self.wipe_calls.lock().unwrap().len()
    }

    pub fn total_calls(&self) -> usize {
        self.prune_calls() + self.wipe_calls()
    }
}

impl Reclaimer for FakeReclaimer {
    fn prune_container_runtime(&self, retention_hours: u64) -> Result<u64, ReclaimError> {
        assert_eq!(retention_hours, 72);
        self.prune_calls.fetch_add(1, Ordering::SeqCst);
        let hook = self.during_prune.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        match self.prune {
            PruneBehavior::Succeed => Ok(4_096),
            PruneBehavior::Fail => Err(ReclaimError::Prune {
                step: PruneStep::Volumes,
                source: RuntimeError::MissingSummary {
                    command: "docker volume prune --force".into(),
                },
            }),
            PruneBehavior::Panic => panic!("runtime client blew up"),
        }
    }

    fn wipe_workspace(&self, root: &Path) -> WipeReport {
        self.wipe_calls.lock().unwrap().push(root.to_path_buf());
        WipeReport {
            root: root.to_path_buf(),
            removed: 3,
            failed: 0,
            recreated: true,
        }
    }
}
