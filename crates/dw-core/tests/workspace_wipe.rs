use std::fs;

use dw_core::reclaim::{wipe_workspace, HostReclaimer, ReclaimKind, ReclaimOutcome, Reclaimer};
use dw_core::reclaim::{ContainerRuntime, RuntimeError};

fn populate(root: &std::path::Path) {
    fs::create_dir_all(root.join("pipeline-a/target/debug")).unwrap();
    fs::create_dir_all(root.join("pipeline-b/.git/objects")).unwrap();
    fs::write(root.join("pipeline-a/target/debug/app"), vec![0u8; 4096]).unwrap();
    fs::write(root.join("pipeline-b/.git/objects/pack"), b"pack").unwrap();
    fs::write(root.join(".hidden"), b"h").unwrap();
}

#[test]
fn twice_in_succession_leaves_empty_readable_root() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("workspace");
    populate(&root);

    let first = wipe_workspace(&root);
    let second = wipe_workspace(&root);

    assert!(first.removed > 0);
    assert!(first.recreated && second.recreated);
    // Second pass only removes and recreates the root itself.
    assert_eq!(second.removed, 1);
    assert_eq!(second.failed, 0);
    assert!(root.is_dir());
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
}

#[test]
fn regular_file_at_root_is_replaced_by_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("workspace");
    fs::write(&root, b"not a dir").unwrap();

    let report = wipe_workspace(&root);

    assert!(report.recreated);
    assert!(root.is_dir());
}

#[cfg(unix)]
#[test]
fn symlinked_root_is_left_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    fs::create_dir(&real).unwrap();
    fs::write(real.join("keep"), b"k").unwrap();
    let link = dir.path().join("workspace");
    std::os::unix::fs::symlink(&real, &link).unwrap();

    let report = wipe_workspace(&link);

    assert_eq!(report.failed, 1);
    assert!(real.join("keep").exists());
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
}

struct NoRuntime;

impl ContainerRuntime for NoRuntime {
    fn prune_containers(&self) -> Result<u64, RuntimeError> {
        Ok(0)
    }
    fn prune_volumes(&self) -> Result<u64, RuntimeError> {
        Ok(0)
    }
    fn prune_images(&self, _older_than_hours: u64) -> Result<u64, RuntimeError> {
        Ok(0)
    }
}

#[test]
fn host_reclaimer_dispatches_by_kind() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("ws");
    populate(&root);
    let reclaimer = HostReclaimer::new(NoRuntime);

    let wiped = reclaimer.reclaim(ReclaimKind::Workspace, &root, 72);
    assert!(matches!(wiped, ReclaimOutcome::Wiped { recreated: true, failed: 0, .. }));
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);

    let pruned = reclaimer.reclaim(ReclaimKind::ContainerRuntime, dir.path(), 72);
    assert_eq!(pruned, ReclaimOutcome::Pruned { bytes_reclaimed: 0 });
    assert!(root.is_dir());
}
