// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Configuration lease — one backup, restore or migration per configuration root
//!
//! Each root is guarded by an advisory `flock` on `<lock_dir>/<root>.lock`.
//! The gateway root spans the daemon and scheduler roots, so it takes all
//! three files; locks are always taken in the same order. Releasing happens
//! on drop.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use libc::{EWOULDBLOCK, LOCK_EX, LOCK_NB, LOCK_UN, flock};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigRoot {
    /// Everything the gateway backup covers
    Gateway,
    /// Daemon configuration directory
    Daemon,
    /// Scheduler task store
    Scheduler,
}

impl ConfigRoot {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigRoot::Gateway => "gateway",
            ConfigRoot::Daemon => "daemon",
            ConfigRoot::Scheduler => "scheduler",
        }
    }

    /// Lock files a lease on this root must hold, in acquisition order
    fn lock_names(&self) -> &'static [&'static str] {
        match self {
            ConfigRoot::Gateway => &["gateway", "daemon", "scheduler"],
            ConfigRoot::Daemon => &["daemon"],
            ConfigRoot::Scheduler => &["scheduler"],
        }
    }
}

impl std::fmt::Display for ConfigRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("configuration root '{0}' is busy with another operation")]
    Busy(ConfigRoot),
    #[error("operation on '{expected}' called with a lease on '{held}'")]
    Mismatch { expected: ConfigRoot, held: ConfigRoot },
    #[error("failed to lock {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Hands out leases on configuration roots
#[derive(Debug, Clone)]
pub struct ConfigLock {
    lock_dir: PathBuf,
}

impl ConfigLock {
    pub fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self { lock_dir: lock_dir.into() }
    }

    /// Fails with `Busy` if another lease on an overlapping root is held
    pub fn try_acquire(&self, root: ConfigRoot) -> Result<ConfigLease, LockError> {
        self.lock(root, false)
    }

    /// Waits until the root is free
    pub fn acquire(&self, root: ConfigRoot) -> Result<ConfigLease, LockError> {
        self.lock(root, true)
    }

    fn lock(&self, root: ConfigRoot, wait: bool) -> Result<ConfigLease, LockError> {
        fs::create_dir_all(&self.lock_dir).map_err(|source| LockError::Io {
            path: self.lock_dir.clone(),
            source,
        })?;
        let mut files = Vec::new();
        for name in root.lock_names() {
            let path = self.lock_dir.join(format!("{}.lock", name));
            // earlier locks in `files` are released by drop on early return
            files.push(lock_file(&path, wait, root)?);
        }
        debug!("Acquired lease on {}", root);
        Ok(ConfigLease { root, files })
    }
}

fn lock_file(path: &Path, wait: bool, root: ConfigRoot) -> Result<LockedFile, LockError> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LockError::Io { path: path.to_path_buf(), source })?;
    let operation = if wait { LOCK_EX } else { LOCK_EX | LOCK_NB };
    let result = unsafe { flock(file.as_raw_fd(), operation) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(EWOULDBLOCK) {
            return Err(LockError::Busy(root));
        }
        return Err(LockError::Io { path: path.to_path_buf(), source: err });
    }
    Ok(LockedFile { file })
}

#[derive(Debug)]
struct LockedFile {
    file: File,
}

impl Drop for LockedFile {
    fn drop(&mut self) {
        unsafe { flock(self.file.as_raw_fd(), LOCK_UN) };
    }
}

/// Proof that the caller holds a configuration root. Released on drop.
#[derive(Debug)]
pub struct ConfigLease {
    root: ConfigRoot,
    files: Vec<LockedFile>,
}

impl ConfigLease {
    pub fn root(&self) -> ConfigRoot {
        self.root
    }

    /// Checks this lease covers `root`
    pub fn covers(&self, root: ConfigRoot) -> Result<(), LockError> {
        if self.root == root || self.root == ConfigRoot::Gateway {
            Ok(())
        } else {
            Err(LockError::Mismatch { expected: root, held: self.root })
        }
    }
}

impl Drop for ConfigLease {
    fn drop(&mut self) {
        // unlock in reverse acquisition order
        while self.files.pop().is_some() {}
        debug!("Released lease on {}", self.root);
    }
}
