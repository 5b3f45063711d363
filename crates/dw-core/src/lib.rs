//! diskwatch core library
//!
//! Disk-pressure watchdog for a single build node:
//! - Disk usage sampling against a threshold
//! - Scheduler node control (idle check, offline, online)
//! - Space reclamation (container runtime prune, workspace wipe)
//! - The maintenance orchestrator and its signal-safe restoration
//!
//! The binary entry point is in `main.rs`.

pub mod exit_codes;
pub mod logging;
pub mod reclaim;
pub mod sample;
pub mod scheduler;
pub mod tool_runner;
pub mod watchdog;
