//! Exit codes for the diskwatch binary.
//!
//! Exit code ranges:
//! - 0-1: Operational outcomes
//! - 10-19: Environment errors (fixable by the operator)
//! - 20-29: Internal errors
//! - 128+N: terminated by signal N, after any forced node restoration

/// Exit codes for diskwatch operations.
///
/// These codes are a stable contract for service managers and wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Clean run / nothing critical.
    Clean = 0,

    /// `check` found at least one path at or above the threshold.
    PressureDetected = 1,

    /// Missing or malformed configuration.
    ConfigError = 10,

    /// Signal listener could not be installed.
    SignalSetupError = 11,

    /// Internal error (bug - please report).
    InternalError = 20,

    /// I/O error outside the watchdog loop (e.g. sampling in `check`).
    IoError = 21,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Error code name (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::PressureDetected => "OK_PRESSURE",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::SignalSetupError => "ERR_SIGNAL_SETUP",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
        }
    }
}

/// Conventional exit status for a process terminated by `signal`.
pub fn signal_exit_status(signal: i32) -> i32 {
    128 + signal
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
