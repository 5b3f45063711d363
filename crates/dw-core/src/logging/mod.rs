//! Structured logging foundation for diskwatch.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for log shippers
//!
//! All log output goes to stderr; stdout is reserved for the JSON payloads
//! of the `check` and `config` subcommands.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, LogContext, Stage};
pub use layer::JsonlLayer;

use std::io::IsTerminal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs. `RUST_LOG`
/// directives, when present, take over filtering entirely.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dw_core={level},diskwatch={level},warn",
            level = config.level
        ))
    });

    match config.format {
        LogFormat::Human => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_ansi(std::io::stderr().is_terminal());

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .init();
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .init();
            }
        }
        LogFormat::Jsonl => {
            tracing_subscriber::registry()
                .with(filter)
                .with(JsonlLayer::stderr())
                .init();
        }
    }
}

/// Generate a unique run ID for this process.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{}", &uuid[..12])
}

/// Get the host ID for logging.
///
/// Uses machine-id on Linux, the hostname otherwise.
pub fn get_host_id() -> String {
    if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return format!("host-{}", hostname);
        }
    }

    format!("host-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

/// Emit a structured event with the standard `event` and `stage` fields.
///
/// Usage:
/// ```ignore
/// log_event!(INFO, event_names::ADMIT_CHECKING, Stage::Admit, "checking node state", node = %name);
/// ```
#[macro_export]
macro_rules! log_event {
    (INFO, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::info!(event = $event, stage = %$stage, $($($field)+ ,)? $msg)
    };
    (DEBUG, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::debug!(event = $event, stage = %$stage, $($($field)+ ,)? $msg)
    };
    (WARN, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::warn!(event = $event, stage = %$stage, $($($field)+ ,)? $msg)
    };
    (ERROR, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::error!(event = $event, stage = %$stage, $($($field)+ ,)? $msg)
    };
    (CRITICAL, $event:expr, $stage:expr, $msg:expr $(, $($field:tt)+)?) => {
        tracing::error!(event = $event, stage = %$stage, severity = "critical", $($($field)+ ,)? $msg)
    };
}
