//! Settings resolution from environment-style key/value input.
//!
//! Resolution order: explicit value → built-in default. Empty values are
//! treated as absent so `FOO=` in a unit file behaves like an unset key.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::validate::{parse_bounded, validate_http_url, SettingsError, SettingsResult};

/// Environment variable names.
pub mod keys {
    pub const SCHEDULER_USER: &str = "JENKINS_USER";
    pub const SCHEDULER_PASS: &str = "JENKINS_PASS";
    pub const SCHEDULER_NODE: &str = "JENKINS_NODE";
    pub const SCHEDULER_URL: &str = "JENKINS_URL";
    pub const SCHEDULER_CONNECT_TIMEOUT: &str = "SCHEDULER_CONNECT_TIMEOUT_SECS";
    pub const SCHEDULER_TIMEOUT: &str = "SCHEDULER_TIMEOUT_SECS";

    pub const THRESHOLD: &str = "DISK_THRESHOLD";
    pub const INTERVAL: &str = "CHECK_INTERVAL";
    pub const RUNTIME_ROOT: &str = "DOCKER_ROOT_DIR";
    pub const WORKSPACE_ROOT: &str = "WORKSPACE_ROOT_DIR";

    pub const RUNTIME_URL: &str = "DOCKER_HOST_URL";
    pub const RUNTIME_API_VERSION: &str = "DOCKER_API_VERSION";
    pub const RETENTION_HOURS: &str = "KEEP_IMAGES_UNTIL";
    pub const RUNTIME_TIMEOUT: &str = "RUNTIME_TIMEOUT_SECS";
}

pub const DEFAULT_SCHEDULER_URL: &str = "http://localhost:8080";
pub const DEFAULT_THRESHOLD_PERCENT: u8 = 70;
pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_RUNTIME_URL: &str = "unix:///var/run/docker.sock";
pub const DEFAULT_RUNTIME_API_VERSION: &str = "1.41";
pub const DEFAULT_RETENTION_HOURS: u64 = 72;
pub const DEFAULT_RUNTIME_ROOT: &str = "/docker";
pub const DEFAULT_WORKSPACE_ROOT: &str = "/workspace";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_SCHEDULER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RUNTIME_TIMEOUT_SECS: u64 = 300;

/// One week of minutes; a longer poll interval is almost certainly a typo.
const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;
/// Ten years of hours.
const MAX_RETENTION_HOURS: u64 = 10 * 365 * 24;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Job scheduler connection and target node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSettings {
    pub url: String,
    pub user: String,
    #[serde(serialize_with = "redacted")]
    pub password: String,
    pub node: String,
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
}

impl SchedulerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Container runtime endpoint and prune policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeSettings {
    pub host_url: String,
    pub api_version: String,
    /// Images unused for longer than this are pruned.
    pub retention_hours: u64,
    pub timeout_secs: u64,
}

impl RuntimeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Monitored paths and the polling cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchSettings {
    /// Used-space percentage at or above which a path is critical.
    pub threshold_percent: u8,
    pub interval_minutes: u64,
    /// Container runtime data root; reclaimed by pruning.
    pub runtime_root: PathBuf,
    /// Build workspace root; reclaimed by wiping.
    pub workspace_root: PathBuf,
}

impl WatchSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Complete, validated watchdog settings.
///
/// Built once at startup and passed by reference to every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settings {
    pub scheduler: SchedulerSettings,
    pub runtime: RuntimeSettings,
    pub watch: WatchSettings,
}

impl Settings {
    /// Resolve settings from the process environment.
    pub fn from_env() -> SettingsResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup.
    ///
    /// The first missing or malformed key aborts resolution.
    pub fn from_lookup<F>(lookup: F) -> SettingsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(SettingsError::MissingKey(key));
        let number = |key: &'static str, default: u64, min: u64, max: u64| match get(key) {
            Some(raw) => parse_bounded(key, &raw, min, max),
            None => Ok(default),
        };

        let user = required(keys::SCHEDULER_USER)?;
        let password = required(keys::SCHEDULER_PASS)?;
        let node = required(keys::SCHEDULER_NODE)?;

        let url = get(keys::SCHEDULER_URL).unwrap_or_else(|| DEFAULT_SCHEDULER_URL.to_string());
        validate_http_url(keys::SCHEDULER_URL, &url)?;

        let threshold = number(keys::THRESHOLD, DEFAULT_THRESHOLD_PERCENT.into(), 0, 100)?;
        let interval_minutes = number(
            keys::INTERVAL,
            DEFAULT_INTERVAL_MINUTES,
            1,
            MAX_INTERVAL_MINUTES,
        )?;
        let retention_hours = number(
            keys::RETENTION_HOURS,
            DEFAULT_RETENTION_HOURS,
            0,
            MAX_RETENTION_HOURS,
        )?;
        let connect_timeout_secs = number(
            keys::SCHEDULER_CONNECT_TIMEOUT,
            DEFAULT_CONNECT_TIMEOUT_SECS,
            1,
            MAX_TIMEOUT_SECS,
        )?;
        let scheduler_timeout_secs = number(
            keys::SCHEDULER_TIMEOUT,
            DEFAULT_SCHEDULER_TIMEOUT_SECS,
            1,
            MAX_TIMEOUT_SECS,
        )?;
        let runtime_timeout_secs = number(
            keys::RUNTIME_TIMEOUT,
            DEFAULT_RUNTIME_TIMEOUT_SECS,
            1,
            MAX_TIMEOUT_SECS,
        )?;

        let runtime_root = PathBuf::from(
            get(keys::RUNTIME_ROOT).unwrap_or_else(|| DEFAULT_RUNTIME_ROOT.to_string()),
        );
        let workspace_root = PathBuf::from(
            get(keys::WORKSPACE_ROOT).unwrap_or_else(|| DEFAULT_WORKSPACE_ROOT.to_string()),
        );
        if runtime_root == workspace_root {
            return Err(SettingsError::InvalidValue {
                key: keys::WORKSPACE_ROOT,
                message: format!(
                    "must differ from {} ({})",
                    keys::RUNTIME_ROOT,
                    runtime_root.display()
                ),
            });
        }

        Ok(Settings {
            scheduler: SchedulerSettings {
                url: url.trim_end_matches('/').to_string(),
                user,
                password,
                node,
                connect_timeout_secs,
                timeout_secs: scheduler_timeout_secs,
            },
            runtime: RuntimeSettings {
                host_url: get(keys::RUNTIME_URL)
                    .unwrap_or_else(|| DEFAULT_RUNTIME_URL.to_string()),
                api_version: get(keys::RUNTIME_API_VERSION)
                    .unwrap_or_else(|| DEFAULT_RUNTIME_API_VERSION.to_string()),
                retention_hours,
                timeout_secs: runtime_timeout_secs,
            },
            watch: WatchSettings {
                threshold_percent: threshold as u8,
                interval_minutes,
                runtime_root,
                workspace_root,
            },
        })
    }

    /// Render as pretty JSON with credentials masked.
    pub fn to_redacted_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn redacted<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        serializer.serialize_str("")
    } else {
        serializer.serialize_str("[REDACTED]")
    }
}
