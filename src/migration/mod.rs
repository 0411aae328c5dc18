// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Migration — move daemon configuration or scheduler tasks between gateways
//!
//! Both managers run the backup and restore pipelines narrowed to one
//! configuration root. Their archives hold that root's contents directly,
//! without a namespace folder.

use chrono::{SecondsFormat, Utc};
use tracing::info;

use crate::archive::ArchiveWriter;
use crate::backup::BackupError;
use crate::config::Settings;
use crate::fsutil;
use crate::lock::{ConfigLease, ConfigRoot};
use crate::namespace::{LiveTarget, Namespace};
use crate::restore::{RestoreCoordinator, RestoreError, RestoreOutcome, Scope, Upload};

/// An exported migration archive
#[derive(Debug, Clone)]
pub struct MigrationArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Zip up the directory target of `namespace` with its contents at the archive root
fn export(
    settings: &Settings,
    lease: &ConfigLease,
    namespace: Namespace,
    root: ConfigRoot,
    file_prefix: &str,
) -> Result<MigrationArchive, BackupError> {
    lease.covers(root)?;
    let mut writer = ArchiveWriter::in_memory();
    for target in namespace.targets(settings) {
        if let LiveTarget::Directory { path, exclude, .. } = target {
            if path.is_dir() {
                writer.add_folder(&path, "", exclude)?;
            }
        }
    }
    if writer.file_count() == 0 {
        return Err(BackupError::NothingToBackUp);
    }
    let files = writer.file_count();
    let bytes = writer.close()?.into_inner();
    let archive = MigrationArchive {
        file_name: format!("{}_{}.zip", file_prefix, timestamp()),
        sha256: fsutil::sha256_bytes(&bytes),
        bytes,
    };
    info!("Exported {} ({} files, {} bytes)", archive.file_name, files, archive.bytes.len());
    Ok(archive)
}

/// Whole daemon configuration directory
pub struct MigrationManager<'a> {
    settings: &'a Settings,
}

impl<'a> MigrationManager<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    pub fn download(&self, lease: &ConfigLease) -> Result<MigrationArchive, BackupError> {
        export(self.settings, lease, Namespace::Daemon, ConfigRoot::Daemon, "iqrf-gateway-configuration")
    }

    /// Validates every component file, then replaces the daemon configuration
    pub fn upload(&self, lease: &ConfigLease, upload: Upload) -> Result<RestoreOutcome, RestoreError> {
        RestoreCoordinator::with_scope(self.settings, Scope::Daemon).restore(lease, upload)
    }
}

/// Scheduler task store; its `schema/` folder stays with the gateway
pub struct SchedulerMigrationManager<'a> {
    settings: &'a Settings,
}

impl<'a> SchedulerMigrationManager<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    pub fn download(&self, lease: &ConfigLease) -> Result<MigrationArchive, BackupError> {
        export(self.settings, lease, Namespace::Scheduler, ConfigRoot::Scheduler, "iqrf-gateway-scheduler")
    }

    /// Validates every task, then replaces the task store
    pub fn upload(&self, lease: &ConfigLease, upload: Upload) -> Result<RestoreOutcome, RestoreError> {
        RestoreCoordinator::with_scope(self.settings, Scope::Scheduler).restore(lease, upload)
    }
}
