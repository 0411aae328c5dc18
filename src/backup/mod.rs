// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Backup — snapshot a selection of the gateway configuration into one archive
//!
//! The selection is resolved to source paths by `SubsystemCollector` (no I/O),
//! then `BackupOrchestrator` writes whatever exists into an in-memory ZIP.
//! An empty result is an error, never an empty archive.

use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::{ArchiveError, ArchiveWriter, OpenMode};
use crate::config::Settings;
use crate::error::ErrorKind;
use crate::fsutil;
use crate::lock::{ConfigLease, ConfigRoot, LockError};
use crate::namespace::{LiveTarget, Namespace, Subsystem};

// ─── Selection ───

/// Software integrations, all off unless set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftwareSelection {
    pub iqrf: bool,
    pub mender: bool,
    pub monit: bool,
    pub pixla: bool,
}

/// OS-level concerns, all off unless set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSelection {
    pub hostname: bool,
    pub journal: bool,
    pub network: bool,
    pub time: bool,
    pub metadata: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSelection {
    pub software: SoftwareSelection,
    pub system: SystemSelection,
}

impl BackupSelection {
    pub fn everything() -> Self {
        Self {
            software: SoftwareSelection { iqrf: true, mender: true, monit: true, pixla: true },
            system: SystemSelection { hostname: true, journal: true, network: true, time: true, metadata: true },
        }
    }

    pub fn enabled(&self, subsystem: Subsystem) -> bool {
        match subsystem {
            Subsystem::Iqrf => self.software.iqrf,
            Subsystem::Mender => self.software.mender,
            Subsystem::Monit => self.software.monit,
            Subsystem::Pixla => self.software.pixla,
            Subsystem::Hostname => self.system.hostname,
            Subsystem::Journal => self.system.journal,
            Subsystem::Network => self.system.network,
            Subsystem::Time => self.system.time,
            Subsystem::Metadata => self.system.metadata,
        }
    }

    /// Turn a toggle on by name, as given on the command line
    pub fn set(&mut self, name: &str) -> Result<(), String> {
        let flag = match name.trim().to_lowercase().as_str() {
            "iqrf" => &mut self.software.iqrf,
            "mender" => &mut self.software.mender,
            "monit" => &mut self.software.monit,
            "pixla" => &mut self.software.pixla,
            "hostname" => &mut self.system.hostname,
            "journal" => &mut self.system.journal,
            "network" => &mut self.system.network,
            "time" => &mut self.system.time,
            "metadata" => &mut self.system.metadata,
            other => return Err(format!("Unknown subsystem '{}'", other)),
        };
        *flag = true;
        Ok(())
    }
}

// ─── Collector ───

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    File,
    Directory { exclude: &'static [&'static str] },
}

/// One live location and where it goes in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub namespace: Namespace,
    pub archive_path: String,
    pub source: PathBuf,
    pub kind: SourceKind,
}

/// Maps a selection to source locations
pub struct SubsystemCollector<'a> {
    settings: &'a Settings,
}

impl<'a> SubsystemCollector<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    pub fn resolve(&self, selection: &BackupSelection) -> Vec<SourceEntry> {
        Namespace::all()
            .iter()
            .filter(|ns| selection.enabled(ns.subsystem()))
            .flat_map(|ns| {
                ns.targets(self.settings).into_iter().map(move |target| match target {
                    LiveTarget::Directory { archive_dir, path, exclude, .. } => SourceEntry {
                        namespace: *ns,
                        archive_path: archive_dir,
                        source: path,
                        kind: SourceKind::Directory { exclude },
                    },
                    LiveTarget::File { archive_path, path } => SourceEntry {
                        namespace: *ns,
                        archive_path,
                        source: path,
                        kind: SourceKind::File,
                    },
                })
            })
            .collect()
    }
}

// ─── Orchestrator ───

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("nothing to back up: the selection matches no configuration on this gateway")]
    NothingToBackUp,
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    Lease(#[from] LockError),
}

impl BackupError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackupError::NothingToBackUp => ErrorKind::EmptyInput,
            BackupError::Lease(LockError::Busy(_)) => ErrorKind::Busy,
            BackupError::Archive(_) | BackupError::Io { .. } | BackupError::Lease(_) => ErrorKind::Internal,
        }
    }
}

/// A finished archive, ready to be streamed or written out
#[derive(Debug, Clone)]
pub struct BackupArchive {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub sha256: String,
    pub namespaces: Vec<Namespace>,
}

/// An archive written to disk
#[derive(Debug, Clone)]
pub struct BackupFile {
    pub path: PathBuf,
    pub sha256: String,
    pub namespaces: Vec<Namespace>,
}

pub struct BackupOrchestrator<'a> {
    settings: &'a Settings,
}

impl<'a> BackupOrchestrator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Sources of `selection` that exist on this host
    fn present_sources(&self, selection: &BackupSelection) -> Result<Vec<SourceEntry>, BackupError> {
        let present: Vec<SourceEntry> = SubsystemCollector::new(self.settings)
            .resolve(selection)
            .into_iter()
            .filter(|entry| {
                let exists = entry.source.exists();
                if !exists {
                    debug!("Skipping {} ({} not present)", entry.archive_path, entry.source.display());
                }
                exists
            })
            .collect();
        if present.is_empty() {
            return Err(BackupError::NothingToBackUp);
        }
        Ok(present)
    }

    fn write_sources<W: Write + Seek>(
        writer: &mut ArchiveWriter<W>,
        sources: &[SourceEntry],
    ) -> Result<Vec<Namespace>, BackupError> {
        let mut namespaces = Vec::new();
        for entry in sources {
            match entry.kind {
                SourceKind::File => {
                    let bytes = fs::read(&entry.source)
                        .map_err(|source| BackupError::Io { path: entry.source.clone(), source })?;
                    writer.add_file(&bytes, &entry.archive_path)?;
                }
                SourceKind::Directory { exclude } => {
                    writer.add_folder(&entry.source, &entry.archive_path, exclude)?;
                }
            }
            if !namespaces.contains(&entry.namespace) {
                namespaces.push(entry.namespace);
            }
        }
        if writer.file_count() == 0 {
            return Err(BackupError::NothingToBackUp);
        }
        Ok(namespaces)
    }

    /// Archive `selection` in memory
    pub fn backup(&self, lease: &ConfigLease, selection: &BackupSelection) -> Result<BackupArchive, BackupError> {
        lease.covers(ConfigRoot::Gateway)?;
        let sources = self.present_sources(selection)?;

        let mut writer = ArchiveWriter::in_memory();
        let namespaces = Self::write_sources(&mut writer, &sources)?;
        let files = writer.file_count();
        let bytes = writer.close()?.into_inner();

        let archive = BackupArchive {
            file_name: archive_file_name(&gateway_id(self.settings)),
            sha256: fsutil::sha256_bytes(&bytes),
            bytes,
            namespaces,
        };
        info!(
            "Created backup {} ({} files, {} bytes, sha256 {})",
            archive.file_name,
            files,
            archive.bytes.len(),
            archive.sha256
        );
        Ok(archive)
    }

    /// Archive `selection` straight into a file. `destination` may be an
    /// existing directory, in which case the generated name is used.
    pub fn backup_to_file(
        &self,
        lease: &ConfigLease,
        selection: &BackupSelection,
        destination: &Path,
        mode: OpenMode,
    ) -> Result<BackupFile, BackupError> {
        lease.covers(ConfigRoot::Gateway)?;
        let sources = self.present_sources(selection)?;

        let path = if destination.is_dir() {
            destination.join(archive_file_name(&gateway_id(self.settings)))
        } else {
            destination.to_path_buf()
        };
        let mut writer = ArchiveWriter::create(&path, mode)?;
        let written = Self::write_sources(&mut writer, &sources).and_then(|namespaces| {
            writer.close()?;
            Ok(namespaces)
        });
        let namespaces = match written {
            Ok(namespaces) => namespaces,
            Err(e) => {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        };
        let sha256 = fsutil::sha256_file(&path).map_err(|source| BackupError::Io { path: path.clone(), source })?;
        info!("Wrote backup {} (sha256 {})", path.display(), sha256);
        Ok(BackupFile { path, sha256, namespaces })
    }
}

/// Gateway id from the metadata file, lower-cased; the host name otherwise
pub fn gateway_id(settings: &Settings) -> String {
    fs::read_to_string(&settings.gateway_info_file)
        .ok()
        .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
        .and_then(|info| info.get("gwId").and_then(|id| id.as_str()).map(str::to_lowercase))
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "gateway".to_string())
        })
}

pub fn archive_file_name(gateway_id: &str) -> String {
    format!(
        "iqrf-gateway-backup_{}_{}.zip",
        gateway_id,
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}
