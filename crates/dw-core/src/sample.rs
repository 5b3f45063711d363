//! Disk usage sampling.
//!
//! A sample is taken fresh on every poll and never cached. The percentage is
//! rounded up, so a filesystem at 69.01% used samples as 70%.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::log_event;
use crate::logging::{event_names, Stage};

/// Errors while reading filesystem usage.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("cannot read disk usage of {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path contains an interior NUL byte: {0}")]
    InvalidPath(PathBuf),
}

/// Raw capacity figures for the filesystem containing a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl DiskUsage {
    /// Used space as a whole percentage, rounded up, capped at 100.
    ///
    /// An empty (zero-capacity) filesystem reports 0.
    pub fn percent_used(&self) -> u8 {
        if self.total_bytes == 0 {
            return 0;
        }
        let used = u128::from(self.used_bytes.min(self.total_bytes));
        let total = u128::from(self.total_bytes);
        ((used * 100).div_ceil(total)) as u8
    }
}

/// Source of filesystem usage figures.
pub trait DiskProbe: Send + Sync {
    fn usage(&self, path: &Path) -> Result<DiskUsage, SampleError>;
}

/// Reads usage with `statvfs(3)`.
///
/// `used` is `(f_blocks - f_bfree) * f_frsize`, matching `df` and excluding
/// nothing reserved for root from the total.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

impl DiskProbe for StatvfsProbe {
    #[cfg(unix)]
    fn usage(&self, path: &Path) -> Result<DiskUsage, SampleError> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| SampleError::InvalidPath(path.to_path_buf()))?;

        let mut stat = MaybeUninit::<libc::statvfs>::uninit();
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if ret != 0 {
            return Err(SampleError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        let stat = unsafe { stat.assume_init() };

        let frsize = stat.f_frsize as u64;
        let total = (stat.f_blocks as u64).saturating_mul(frsize);
        let free = (stat.f_bfree as u64).saturating_mul(frsize);
        Ok(DiskUsage {
            total_bytes: total,
            used_bytes: total.saturating_sub(free),
        })
    }

    #[cfg(not(unix))]
    fn usage(&self, path: &Path) -> Result<DiskUsage, SampleError> {
        Err(SampleError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "statvfs is only available on unix",
            ),
        })
    }
}

/// One classified usage reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSample {
    pub path: PathBuf,
    pub percent_used: u8,
    pub threshold: u8,
    pub critical: bool,
}

/// Classify a percentage against the threshold. Equal counts as critical.
pub fn is_critical(percent_used: u8, threshold: u8) -> bool {
    percent_used >= threshold
}

/// Sample `path` and classify it, logging one line at critical or info level.
///
/// Probe failures are returned untouched for the caller's error boundary.
pub fn sample(
    probe: &dyn DiskProbe,
    path: &Path,
    threshold: u8,
) -> Result<UsageSample, SampleError> {
    let usage = probe.usage(path)?;
    let percent_used = usage.percent_used();
    let critical = is_critical(percent_used, threshold);

    if critical {
        log_event!(
            CRITICAL,
            event_names::SAMPLE_TAKEN,
            Stage::Sample,
            "disk usage over threshold",
            path = %path.display(),
            percent = percent_used,
            threshold = threshold
        );
    } else {
        log_event!(
            INFO,
            event_names::SAMPLE_TAKEN,
            Stage::Sample,
            "disk usage",
            path = %path.display(),
            percent = percent_used,
            threshold = threshold
        );
    }

    Ok(UsageSample {
        path: path.to_path_buf(),
        percent_used,
        threshold,
        critical,
    })
}
