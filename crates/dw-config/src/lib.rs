//! diskwatch settings loading and validation.
//!
//! This crate provides:
//! - The immutable [`Settings`] value every watchdog component receives
//! - Resolution from environment-style key/value input
//! - Validation of required keys and numeric ranges

pub mod settings;
pub mod validate;

pub use settings::{keys, RuntimeSettings, SchedulerSettings, Settings, WatchSettings};
pub use validate::{SettingsError, SettingsResult};
