// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Apply — replace live configuration with a validated staging tree
//!
//! Directories are rebuilt next to the live one and swapped in with two
//! renames; files go through a temporary sibling. Either way a target is
//! never observed half-written. Every namespace is attempted even after a
//! failure, and failures are collected for the caller.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::fsutil;
use crate::namespace::{LiveTarget, Namespace};

/// A target that could not be replaced
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub namespace: Namespace,
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.namespace, self.path.display(), self.message)
    }
}

/// Result of applying a whole plan
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<Namespace>,
    pub failed: Vec<ApplyFailure>,
}

/// Apply each namespace's targets from `staging_root`. Targets missing
/// from the staging tree are left alone.
pub fn apply(staging_root: &Path, plan: &[(Namespace, Vec<LiveTarget>)]) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (namespace, targets) in plan {
        let mut ok = true;
        for target in targets {
            if let Err(e) = apply_target(staging_root, target) {
                warn!("Failed to restore {} into {}: {}", namespace, target.live_path().display(), e);
                report.failed.push(ApplyFailure {
                    namespace: *namespace,
                    path: target.live_path().clone(),
                    message: e.to_string(),
                });
                ok = false;
            }
        }
        if ok {
            info!("Restored {}", namespace);
            report.applied.push(*namespace);
        }
    }
    report
}

fn apply_target(staging_root: &Path, target: &LiveTarget) -> io::Result<()> {
    match target {
        LiveTarget::Directory { archive_dir, path, exclude, private } => {
            let staged = staged_path(staging_root, archive_dir);
            if !staged.is_dir() {
                debug!("{} not in archive, keeping {}", archive_dir, path.display());
                return Ok(());
            }
            swap_directory(&staged, path, exclude, private)
        }
        LiveTarget::File { archive_path, path } => {
            let staged = staged_path(staging_root, archive_path);
            if !staged.is_file() {
                debug!("{} not in archive, keeping {}", archive_path, path.display());
                return Ok(());
            }
            let bytes = fs::read(&staged)?;
            fsutil::write_atomic(path, &bytes)
        }
    }
}

fn staged_path(staging_root: &Path, archive_path: &str) -> PathBuf {
    if archive_path.is_empty() {
        staging_root.to_path_buf()
    } else {
        staging_root.join(archive_path)
    }
}

/// Build the new tree beside `live`, then rename it into place.
/// Excluded names keep their live contents.
fn swap_directory(staged: &Path, live: &Path, exclude: &[&str], private: &[&str]) -> io::Result<()> {
    if let Some(parent) = live.parent() {
        fs::create_dir_all(parent)?;
    }
    let fresh = fsutil::sibling_path(live, "restore");
    if let Err(e) = build_tree(staged, live, &fresh, exclude, private) {
        let _ = fs::remove_dir_all(&fresh);
        return Err(e);
    }

    if !live.exists() {
        return fs::rename(&fresh, live);
    }
    let old = fsutil::sibling_path(live, "old");
    if let Err(e) = fs::rename(live, &old) {
        let _ = fs::remove_dir_all(&fresh);
        return Err(e);
    }
    if let Err(e) = fs::rename(&fresh, live) {
        // put the previous tree back
        if let Err(back) = fs::rename(&old, live) {
            warn!("Failed to put back {} from {}: {}", live.display(), old.display(), back);
        }
        let _ = fs::remove_dir_all(&fresh);
        return Err(e);
    }
    if let Err(e) = fs::remove_dir_all(&old) {
        warn!("Failed to remove previous tree {}: {}", old.display(), e);
    }
    Ok(())
}

fn build_tree(staged: &Path, live: &Path, fresh: &Path, exclude: &[&str], private: &[&str]) -> io::Result<()> {
    fsutil::copy_tree(staged, fresh, exclude)?;
    for name in exclude {
        let kept = live.join(name);
        if kept.is_dir() {
            fsutil::copy_tree(&kept, &fresh.join(name), &[])?;
        } else if kept.is_file() {
            fs::copy(&kept, fresh.join(name))?;
        }
    }
    if let Ok(meta) = fs::metadata(live) {
        fs::set_permissions(fresh, meta.permissions())?;
    }
    for sub in private {
        fsutil::make_private(&staged_path(fresh, sub))?;
    }
    Ok(())
}
