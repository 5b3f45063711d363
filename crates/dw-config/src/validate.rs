//! Settings validation errors and value parsers.

use thiserror::Error;

/// Validation result type.
pub type SettingsResult<T> = Result<T, SettingsError>;

/// Fatal startup errors. Any of these prevents the watchdog loop from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing required setting: {0}")]
    MissingKey(&'static str),

    #[error("Invalid integer for {key}: {value:?}")]
    NotAnInteger { key: &'static str, value: String },

    #[error("Value for {key} out of range: {value} (allowed {min}..={max})")]
    OutOfRange {
        key: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

impl SettingsError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            SettingsError::MissingKey(_) => 64,
            SettingsError::NotAnInteger { .. } => 65,
            SettingsError::OutOfRange { .. } => 66,
            SettingsError::InvalidValue { .. } => 67,
        }
    }

    /// The setting key the error refers to.
    pub fn key(&self) -> &'static str {
        match self {
            SettingsError::MissingKey(key)
            | SettingsError::NotAnInteger { key, .. }
            | SettingsError::OutOfRange { key, .. }
            | SettingsError::InvalidValue { key, .. } => key,
        }
    }
}

/// Parse an unsigned integer setting and check it against an inclusive range.
///
/// Surrounding whitespace is tolerated; signs, decimals and unit suffixes are not.
pub fn parse_bounded(key: &'static str, raw: &str, min: u64, max: u64) -> SettingsResult<u64> {
    let trimmed = raw.trim();
    let value: u64 = trimmed.parse().map_err(|_| SettingsError::NotAnInteger {
        key,
        value: raw.to_string(),
    })?;

    if value < min || value > max {
        return Err(SettingsError::OutOfRange {
            key,
            value,
            min,
            max,
        });
    }
    Ok(value)
}

/// Validate that an endpoint URL uses a scheme the scheduler client can speak.
pub fn validate_http_url(key: &'static str, url: &str) -> SettingsResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }
    Err(SettingsError::InvalidValue {
        key,
        message: format!("expected an http(s) URL, got {url:?}"),
    })
}
