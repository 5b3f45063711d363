//! Best-effort workspace wipe.
//!
//! Removes the workspace root and everything below it, then recreates the
//! root as an empty directory. Entries that cannot be removed are counted
//! and skipped. Symlinks are unlinked, never followed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::log_event;
use crate::logging::{event_names, Stage};

/// Tally of one wipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WipeReport {
    pub root: PathBuf,
    /// Files, links and directories removed.
    pub removed: usize,
    /// Entries that could not be read or removed.
    pub failed: usize,
    /// The root exists as a directory after the wipe.
    pub recreated: bool,
}

/// Wipe `root` and recreate it empty. Never fails outward.
pub fn wipe_workspace(root: &Path) -> WipeReport {
    log_event!(
        INFO,
        event_names::RECLAIM_STARTED,
        Stage::Reclaim,
        "wiping workspace",
        root = %root.display()
    );

    let mut report = WipeReport {
        root: root.to_path_buf(),
        ..WipeReport::default()
    };

    match fs::symlink_metadata(root) {
        Ok(meta) if meta.file_type().is_symlink() => {
            // Removing the link would replace the target with a fresh
            // directory on recreate; leave it in place.
            log_event!(
                WARN,
                event_names::RECLAIM_FAILED,
                Stage::Reclaim,
                "workspace root is a symlink, not wiping",
                root = %root.display()
            );
            report.failed += 1;
        }
        Ok(meta) if meta.is_dir() => remove_tree(root, &mut report),
        Ok(_) => remove_entry(root, false, &mut report),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            debug!(path = %root.display(), error = %err, "cannot stat workspace root");
            report.failed += 1;
        }
    }

    match fs::create_dir_all(root) {
        Ok(()) => report.recreated = root.is_dir(),
        Err(err) => {
            log_event!(
                ERROR,
                event_names::RECLAIM_FAILED,
                Stage::Reclaim,
                "cannot recreate workspace root",
                root = %root.display(),
                error = %err
            );
        }
    }

    log_event!(
        INFO,
        event_names::RECLAIM_FINISHED,
        Stage::Reclaim,
        "workspace wiped",
        root = %root.display(),
        removed = report.removed,
        failed = report.failed,
        recreated = report.recreated
    );
    report
}

/// Depth-first removal of a directory that is known not to be a symlink.
fn remove_tree(dir: &Path, report: &mut WipeReport) {
    match fs::read_dir(dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        debug!(path = %dir.display(), error = %err, "unreadable directory entry");
                        report.failed += 1;
                        continue;
                    }
                };
                let path = entry.path();
                // DirEntry::file_type does not follow symlinks.
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => remove_tree(&path, report),
                    Ok(_) => remove_entry(&path, false, report),
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "cannot stat entry");
                        report.failed += 1;
                    }
                }
            }
        }
        Err(err) => {
            debug!(path = %dir.display(), error = %err, "cannot list directory");
            report.failed += 1;
        }
    }
    remove_entry(dir, true, report);
}

fn remove_entry(path: &Path, is_dir: bool, report: &mut WipeReport) {
    let result = if is_dir {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => report.removed += 1,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            debug!(path = %path.display(), error = %err, "cannot remove");
            report.failed += 1;
        }
    }
}
