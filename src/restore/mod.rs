// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Restore — accept an uploaded archive and replace the live configuration
//!
//! Received → Extracted → Validated → Applied. Nothing outside the staging
//! directory is touched before every file has passed its content check and
//! the restart plan is known. The staging directory is removed on every
//! exit path.

pub mod apply;

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::archive::{ArchiveError, ArchiveReader, EmptyArchive, EntryKind, StagedEntry};
use crate::config::Settings;
use crate::error::ErrorKind;
use crate::lock::{ConfigLease, ConfigRoot, LockError};
use crate::namespace::{ContentKind, LiveTarget, Namespace};
use crate::schema::{GateOutcome, SCHEDULER_TASK_SCHEMA, SchemaError, SchemaGate, SchemaStore, Violation};
use crate::services::{InitSystem, RestartCommand};

pub use apply::ApplyFailure;

/// MIME types accepted for an uploaded archive
pub const ZIP_CONTENT_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed", "application/x-zip"];

/// `application/zip; charset=binary` and `Application/ZIP` both count
pub fn is_zip_content_type(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    ZIP_CONTENT_TYPES.contains(&essence.as_str())
}

/// Which part of the configuration an archive is restored into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Operator backup: every namespace, archive laid out by namespace
    Gateway,
    /// Daemon migration: the archive root is the daemon configuration directory
    Daemon,
    /// Scheduler migration: the archive root is the task store
    Scheduler,
}

impl Scope {
    pub fn root(&self) -> ConfigRoot {
        match self {
            Scope::Gateway => ConfigRoot::Gateway,
            Scope::Daemon => ConfigRoot::Daemon,
            Scope::Scheduler => ConfigRoot::Scheduler,
        }
    }

    /// Namespace owning `archive_path`, and the path inside it
    pub fn locate(&self, archive_path: &str) -> Option<(Namespace, String)> {
        match self {
            Scope::Gateway => Namespace::locate(archive_path),
            Scope::Daemon => Some((Namespace::Daemon, archive_path.to_string())),
            Scope::Scheduler => Some((Namespace::Scheduler, archive_path.to_string())),
        }
    }

    /// Where `relative` inside `namespace` belongs in an archive of this scope
    pub fn archive_path(&self, namespace: Namespace, relative: &str) -> String {
        match self {
            Scope::Gateway => namespace.archive_path_of(relative),
            Scope::Daemon | Scope::Scheduler => relative.to_string(),
        }
    }

    /// Live targets of `namespace`, addressed the way this scope lays out archives
    pub fn targets(&self, namespace: Namespace, settings: &Settings) -> Vec<LiveTarget> {
        let targets = namespace.targets(settings);
        match self {
            Scope::Gateway => targets,
            Scope::Daemon | Scope::Scheduler => targets
                .into_iter()
                .map(|t| t.rebased(namespace.archive_name()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestoreState {
    Received,
    Extracted,
    Validated,
    Applied,
}

/// Raw upload as handed over by the caller
#[derive(Debug, Clone)]
pub struct Upload {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn zip(bytes: Vec<u8>) -> Self {
        Self { content_type: "application/zip".to_string(), bytes }
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("unsupported content type '{0}', expected a ZIP archive")]
    UnsupportedContentType(String),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("{path} is not valid JSON: {message}")]
    MalformedContent { path: String, message: String },
    #[error("{path} ({component}) violates its schema: {}", format_violations(.violations))]
    SchemaViolation { path: String, component: String, violations: Vec<Violation> },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("unsupported init system '{0}', cannot restart services")]
    UnsupportedInitSystem(String),
    #[error("restore only partially applied: {}", format_failures(.failed))]
    PartialApply { failed: Vec<ApplyFailure>, applied: Vec<Namespace> },
    #[error("failed to prepare staging area: {0}")]
    Staging(std::io::Error),
    #[error(transparent)]
    Lease(#[from] LockError),
}

fn format_violations(violations: &[Violation]) -> String {
    violations.iter().map(|v| v.to_string()).collect::<Vec<_>>().join("; ")
}

fn format_failures(failed: &[ApplyFailure]) -> String {
    failed.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

impl RestoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RestoreError::UnsupportedContentType(_) => ErrorKind::MalformedContainer,
            RestoreError::Archive(ArchiveError::Empty(EmptyArchive::NoFiles)) => ErrorKind::EmptyInput,
            RestoreError::Archive(
                ArchiveError::Empty(EmptyArchive::ZeroLength)
                | ArchiveError::Corrupt(_)
                | ArchiveError::UnsafePath(_)
                | ArchiveError::Conflict(_)
                | ArchiveError::TooLarge(_),
            ) => ErrorKind::MalformedContainer,
            RestoreError::MalformedContent { .. } => ErrorKind::MalformedContent,
            RestoreError::SchemaViolation { .. } => ErrorKind::SchemaViolation,
            RestoreError::UnsupportedInitSystem(_) => ErrorKind::UnsupportedInitSystem,
            RestoreError::PartialApply { .. } => ErrorKind::PartialApply,
            RestoreError::Lease(LockError::Busy(_)) => ErrorKind::Busy,
            RestoreError::Archive(_) | RestoreError::Schema(_) | RestoreError::Staging(_) | RestoreError::Lease(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The live tree is untouched
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}

/// What a successful restore did and what the caller must do next
#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    #[serde(rename = "rebootRequired")]
    pub reboot_required: bool,
    #[serde(skip)]
    pub restarts: Vec<RestartCommand>,
    #[serde(skip)]
    pub namespaces: Vec<Namespace>,
}

pub struct RestoreCoordinator<'a> {
    settings: &'a Settings,
    scope: Scope,
    init: InitSystem,
}

impl<'a> RestoreCoordinator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self::with_scope(settings, Scope::Gateway)
    }

    pub fn with_scope(settings: &'a Settings, scope: Scope) -> Self {
        Self {
            settings,
            scope,
            init: InitSystem::from_setting(&settings.init_system),
        }
    }

    pub fn with_init_system(mut self, init: InitSystem) -> Self {
        self.init = init;
        self
    }

    pub fn restore(&self, lease: &ConfigLease, upload: Upload) -> Result<RestoreOutcome, RestoreError> {
        lease.covers(self.scope.root())?;

        // Received
        if !is_zip_content_type(&upload.content_type) {
            return Err(RestoreError::UnsupportedContentType(upload.content_type));
        }
        let mut reader =
            ArchiveReader::from_bytes(upload.bytes)?.with_size_limit(self.settings.max_extracted_bytes);
        let mut state = RestoreState::Received;
        debug!("Restore {:?}: {} files in archive", state, reader.list_files().len());

        fs::create_dir_all(&self.settings.staging_dir).map_err(RestoreError::Staging)?;
        let staging = tempfile::Builder::new()
            .prefix("iqrf-gateway-restore-")
            .tempdir_in(&self.settings.staging_dir)
            .map_err(RestoreError::Staging)?;
        let staged = reader.extract_all(staging.path())?;
        state = RestoreState::Extracted;
        debug!("Restore {:?}: {} entries into {}", state, staged.len(), staging.path().display());

        let namespaces = self.validate(&staging, &staged)?;
        let (restarts, reboot_required) = self.plan(&namespaces)?;
        state = RestoreState::Validated;
        info!("Restore {:?}: {} namespaces accepted", state, namespaces.len());

        let plan: Vec<(Namespace, Vec<LiveTarget>)> = namespaces
            .iter()
            .map(|ns| (*ns, self.scope.targets(*ns, self.settings)))
            .collect();
        let report = apply::apply(staging.path(), &plan);
        if !report.failed.is_empty() {
            error!("Restore applied {} of {} namespaces", report.applied.len(), namespaces.len());
            return Err(RestoreError::PartialApply { failed: report.failed, applied: report.applied });
        }
        state = RestoreState::Applied;
        info!(
            "Restore {:?}: {} services to restart, reboot required: {}",
            state,
            restarts.len(),
            reboot_required
        );

        Ok(RestoreOutcome { reboot_required, restarts, namespaces })
    }

    /// Check every staged entry where it was actually written. Entries
    /// under a legacy folder name are moved to the current one. Returns the
    /// namespaces present in the archive.
    fn validate(&self, staging: &TempDir, staged: &[StagedEntry]) -> Result<Vec<Namespace>, RestoreError> {
        let component_gate = SchemaGate::new(SchemaStore::new(&self.settings.daemon_schema_dir));
        let task_gate = SchemaGate::new(SchemaStore::new(self.settings.scheduler_schema_dir()));
        let mut present = BTreeSet::new();

        for entry in staged {
            let file = &entry.path;
            let Some((namespace, relative)) = self.scope.locate(file) else {
                warn!("Ignoring {}: not part of any known namespace", file);
                continue;
            };
            let kind = namespace.content_kind(&relative);
            if kind == ContentKind::Skipped {
                debug!("Skipping {}", file);
                continue;
            }
            let canonical = self.scope.archive_path(namespace, &relative);
            if entry.kind == EntryKind::Symlink {
                self.check_symlink(namespace, kind, file, &canonical)?;
            }
            if &canonical != file && !relocate(staging.path(), file, &canonical)? {
                continue;
            }
            present.insert(namespace);

            let outcome = match kind {
                ContentKind::Component => {
                    let document = parse_json(staging.path(), &canonical, file)?;
                    let (component, outcome) = component_gate.check_component(&document)?;
                    let component = component.map(|c| c.to_string()).unwrap_or_else(|| "unknown component".to_string());
                    Some((component, outcome))
                }
                ContentKind::SchedulerTask => {
                    let document = parse_json(staging.path(), &canonical, file)?;
                    Some(("scheduler task".to_string(), task_gate.check_with(SCHEDULER_TASK_SCHEMA, &document)?))
                }
                ContentKind::Json => {
                    parse_json(staging.path(), &canonical, file)?;
                    None
                }
                ContentKind::Opaque | ContentKind::Skipped => None,
            };

            match outcome {
                Some((component, GateOutcome::Invalid(violations))) => {
                    warn!("{} rejected: {} violations", file, violations.len());
                    return Err(RestoreError::SchemaViolation { path: file.clone(), component, violations });
                }
                Some((component, GateOutcome::SchemaNotFound)) => {
                    debug!("{} ({}) accepted without schema", file, component);
                }
                Some((_, GateOutcome::Valid)) | None => debug!("{} accepted", file),
            }
        }
        Ok(present.into_iter().collect())
    }

    /// Links are only restored as members of a replaced directory, never
    /// as a checked document or in place of a single file or directory.
    fn check_symlink(
        &self,
        namespace: Namespace,
        kind: ContentKind,
        file: &str,
        canonical: &str,
    ) -> Result<(), RestoreError> {
        let inside_directory = self.scope.targets(namespace, self.settings).iter().any(|target| match target {
            LiveTarget::Directory { archive_dir, .. } => {
                archive_dir.is_empty()
                    || canonical.strip_prefix(archive_dir.as_str()).is_some_and(|rest| rest.starts_with('/'))
            }
            LiveTarget::File { .. } => false,
        });
        if kind == ContentKind::Opaque && inside_directory {
            return Ok(());
        }
        warn!("{} rejected: symbolic link", file);
        Err(RestoreError::MalformedContent {
            path: file.to_string(),
            message: "symbolic link where a regular file is expected".to_string(),
        })
    }

    /// Services to restart and whether a reboot is needed
    fn plan(&self, namespaces: &[Namespace]) -> Result<(Vec<RestartCommand>, bool), RestoreError> {
        let mut services: Vec<&str> = Vec::new();
        for ns in namespaces {
            for service in ns.services() {
                if !services.contains(service) {
                    services.push(service);
                }
            }
        }
        let restarts = services
            .iter()
            .map(|service| {
                self.init
                    .restart_command(service)
                    .ok_or_else(|| RestoreError::UnsupportedInitSystem(self.init.name().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let reboot_required = namespaces.iter().any(|ns| ns.requires_reboot());
        Ok((restarts, reboot_required))
    }
}

/// Moves a staged entry from a legacy location to its current one. An
/// entry already present at the current location wins; returns false when
/// the legacy copy was dropped.
fn relocate(root: &Path, from: &str, to: &str) -> Result<bool, RestoreError> {
    let target = root.join(to);
    if target.symlink_metadata().is_ok() {
        warn!("Ignoring {}: {} is also in the archive", from, to);
        return Ok(false);
    }
    let moved = match target.parent() {
        Some(parent) => fs::create_dir_all(parent).and_then(|_| fs::rename(root.join(from), &target)),
        None => fs::rename(root.join(from), &target),
    };
    moved.map_err(|e| RestoreError::MalformedContent { path: from.to_string(), message: e.to_string() })?;
    debug!("Moved {} to {}", from, to);
    Ok(true)
}

/// Parses the staged copy at `staged`; errors name the archive entry `file`
fn parse_json(root: &Path, staged: &str, file: &str) -> Result<Value, RestoreError> {
    let content = fs::read(root.join(staged)).map_err(|e| RestoreError::MalformedContent {
        path: file.to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_slice(&content).map_err(|e| RestoreError::MalformedContent {
        path: file.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveWriter;
    use crate::backup::{BackupOrchestrator, BackupSelection};
    use crate::test_support::{FakeGateway, MQTT_COMPONENT, mqtt_instance};
    use serde_json::json;

    fn build(files: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ArchiveWriter::in_memory();
        for (path, content) in files {
            writer.add_file(content.as_bytes(), path).unwrap();
        }
        writer.close().unwrap().into_inner()
    }

    fn restore(gateway: &FakeGateway, upload: Upload) -> Result<RestoreOutcome, RestoreError> {
        let lease = gateway.lease(ConfigRoot::Gateway);
        RestoreCoordinator::new(&gateway.settings).restore(&lease, upload)
    }

    fn full_backup(gateway: &FakeGateway) -> Vec<u8> {
        let lease = gateway.lease(ConfigRoot::Gateway);
        BackupOrchestrator::new(&gateway.settings)
            .backup(&lease, &BackupSelection::everything())
            .unwrap()
            .bytes
    }

    #[test]
    fn content_types() {
        assert!(is_zip_content_type("application/zip"));
        assert!(is_zip_content_type("Application/X-Zip-Compressed; charset=binary"));
        assert!(!is_zip_content_type("application/json"));
        assert!(!is_zip_content_type(""));
    }

    #[test]
    fn wrong_content_type_is_rejected_before_extraction() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let upload = Upload { content_type: "text/plain".into(), bytes: build(&[("mmonit", "x")]) };
        let err = restore(&gateway, upload).unwrap_err();
        assert!(matches!(err, RestoreError::UnsupportedContentType(_)));
        assert_eq!(err.kind(), ErrorKind::MalformedContainer);
        assert_eq!(gateway.digest(), before);
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn zero_length_upload_is_a_malformed_container() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let err = restore(&gateway, Upload::zip(Vec::new())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedContainer);
        assert!(err.is_recoverable());
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn archive_without_files_is_empty_input() {
        let gateway = FakeGateway::new();
        let mut writer = ArchiveWriter::in_memory();
        writer.add_empty_folder("monit").unwrap();
        let bytes = writer.close().unwrap().into_inner();
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyInput);
    }

    #[test]
    fn one_invalid_file_rejects_the_whole_archive() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = build(&[
            ("monit/monitrc", "set daemon 60\n"),
            ("nm/NetworkManager.conf", "[main]\n"),
            ("daemon/config.json", "{}"),
            ("daemon/iqrf__MqttMessaging.json", &mqtt_instance("MqttMessaging", 7)),
        ]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        match &err {
            RestoreError::SchemaViolation { path, component, violations } => {
                assert_eq!(path, "daemon/iqrf__MqttMessaging.json");
                assert_eq!(component, "iqrf::MqttMessaging");
                assert_eq!(violations[0].pointer, "/Qos");
            }
            other => panic!("expected schema violation, got {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::SchemaViolation);
        assert_eq!(gateway.digest(), before);
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn unparsable_json_is_malformed_content() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = build(&[("controller/config.json", "{not json")]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::MalformedContent { ref path, .. } if path == "controller/config.json"));
        assert_eq!(err.kind(), ErrorKind::MalformedContent);
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn invalid_scheduler_task_is_rejected() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("daemon/scheduler/2.json", &json!({"taskId": "2"}).to_string())]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::SchemaViolation { ref component, .. } if component == "scheduler task"));
    }

    #[test]
    fn missing_schema_does_not_block_restore() {
        let gateway = FakeGateway::new();
        let bytes = full_backup(&gateway);
        fs::remove_file(gateway.settings.daemon_schema_dir.join("schema__iqrf__MqttMessaging.json")).unwrap();
        fs::write(
            gateway.settings.daemon_config_dir.join(MQTT_COMPONENT),
            mqtt_instance("Changed", 0),
        )
        .unwrap();

        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert!(outcome.namespaces.contains(&Namespace::Daemon));
        let restored = fs::read_to_string(gateway.settings.daemon_config_dir.join(MQTT_COMPONENT)).unwrap();
        assert_eq!(restored, mqtt_instance("MqttMessaging", 1));
    }

    #[test]
    fn round_trip_restores_previous_state() {
        let gateway = FakeGateway::new();
        let bytes = full_backup(&gateway);
        let before = gateway.digest();

        fs::write(&gateway.settings.hostname_file, "changed\n").unwrap();
        fs::write(gateway.settings.monit_dir.join("conf.d/extra"), "check process x\n").unwrap();
        fs::remove_file(gateway.settings.scheduler_dir().join("1.json")).unwrap();
        assert_ne!(gateway.digest(), before);

        restore(&gateway, Upload::zip(bytes)).unwrap();
        assert_eq!(gateway.digest(), before);
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn restoring_twice_is_idempotent() {
        let gateway = FakeGateway::new();
        let bytes = full_backup(&gateway);
        fs::write(&gateway.settings.journald_conf, "[Journal]\nStorage=volatile\n").unwrap();

        restore(&gateway, Upload::zip(bytes.clone())).unwrap();
        let once = gateway.digest();
        restore(&gateway, Upload::zip(bytes)).unwrap();
        assert_eq!(gateway.digest(), once);
    }

    #[test]
    fn scheduler_schema_survives_restore() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("daemon/scheduler/5.json", &crate::test_support::task("5"))]);
        restore(&gateway, Upload::zip(bytes)).unwrap();
        let scheduler = gateway.settings.scheduler_dir();
        assert!(scheduler.join("5.json").is_file());
        assert!(!scheduler.join("1.json").exists());
        assert!(gateway.settings.scheduler_schema_dir().join(SCHEDULER_TASK_SCHEMA).is_file());
    }

    #[test]
    fn network_only_archive_requires_reboot() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("nm/NetworkManager.conf", "[main]\n"), ("nm/system-connections/wlan0.nmconnection", "[connection]\n")]);
        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert!(outcome.reboot_required);
        assert_eq!(outcome.restarts.len(), 1);
        assert_eq!(outcome.restarts[0].to_string(), "systemctl restart NetworkManager");
        assert_eq!(serde_json::to_value(&outcome).unwrap(), json!({"rebootRequired": true}));
    }

    #[test]
    fn monit_only_archive_needs_no_reboot() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("monit/monitrc", "set daemon 10\n"), ("mmonit", "set mmonit off\n")]);
        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert!(!outcome.reboot_required);
        assert_eq!(outcome.namespaces, vec![Namespace::Monit, Namespace::MMonit]);
        assert_eq!(outcome.restarts.len(), 1);
        assert_eq!(outcome.restarts[0].service, "monit");
        assert_eq!(
            fs::read_to_string(gateway.settings.monit_dir.join("mmonit")).unwrap(),
            "set mmonit off\n"
        );
        // conf.d was not in the archive and stays as it was
        assert!(gateway.settings.monit_dir.join("conf.d/system").is_file());
    }

    #[test]
    fn unknown_namespaces_are_ignored() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = build(&[("docker/compose.yml", "services: {}\n")]);
        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert!(outcome.namespaces.is_empty());
        assert!(outcome.restarts.is_empty());
        assert!(!outcome.reboot_required);
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn unsupported_init_system_is_reported_before_apply() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = build(&[("journal/journald.conf", "[Journal]\n")]);
        let lease = gateway.lease(ConfigRoot::Gateway);
        let err = RestoreCoordinator::new(&gateway.settings)
            .with_init_system(InitSystem::Unknown("openrc".into()))
            .restore(&lease, Upload::zip(bytes))
            .unwrap_err();
        assert!(matches!(err, RestoreError::UnsupportedInitSystem(ref name) if name == "openrc"));
        assert_eq!(err.kind(), ErrorKind::UnsupportedInitSystem);
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn docker_supervisor_restarts() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("controller/config.json", "{}")]);
        let lease = gateway.lease(ConfigRoot::Gateway);
        let outcome = RestoreCoordinator::new(&gateway.settings)
            .with_init_system(InitSystem::DockerSupervisor)
            .restore(&lease, Upload::zip(bytes))
            .unwrap();
        assert_eq!(outcome.restarts[0].to_string(), "supervisorctl restart iqrf-gateway-controller");
    }

    #[test]
    fn zip_slip_entries_are_rejected() {
        let gateway = FakeGateway::new();
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("../../escape.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::Archive(ArchiveError::UnsafePath(_))));
        assert_eq!(err.kind(), ErrorKind::MalformedContainer);
        assert!(!gateway.dir.path().join("escape.txt").exists());
        assert!(gateway.staging_is_empty());
    }

    /// Archive with entry names written exactly as given
    fn raw(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            std::io::Write::write_all(&mut writer, content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn non_canonical_names_cannot_bypass_the_schema() {
        let invalid = mqtt_instance("MqttMessaging", 7);
        for name in [
            "daemon/./iqrf__MqttMessaging.json",
            "daemon//iqrf__MqttMessaging.json",
            "./daemon/iqrf__MqttMessaging.json",
        ] {
            let gateway = FakeGateway::new();
            let before = gateway.digest();
            let bytes = raw(&[("daemon/config.json", "{}"), (name, &invalid)]);
            let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedContainer, "{}", name);
            assert_eq!(gateway.digest(), before, "{}", name);
            let live = fs::read_to_string(gateway.settings.daemon_config_dir.join(MQTT_COMPONENT)).unwrap();
            assert_eq!(live, mqtt_instance("MqttMessaging", 1));
            assert!(gateway.staging_is_empty());
        }
    }

    #[test]
    fn colliding_entries_are_a_malformed_container() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = raw(&[("monit/conf.d", "x"), ("monit/conf.d/system", "check system $HOST\n")]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::Archive(ArchiveError::Conflict(_))));
        assert_eq!(err.kind(), ErrorKind::MalformedContainer);
        assert_eq!(gateway.digest(), before);
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn oversized_archive_is_refused_before_apply() {
        let mut gateway = FakeGateway::new();
        gateway.settings.max_extracted_bytes = 64;
        let before = gateway.digest();
        let bytes = build(&[("pixla/customer_id", &"4".repeat(65))]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::Archive(ArchiveError::TooLarge(64))));
        assert_eq!(err.kind(), ErrorKind::MalformedContainer);
        assert_eq!(gateway.digest(), before);
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn non_json_scheduler_entries_are_checked() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        let bytes = build(&[("daemon/scheduler/evil.txt", "rm -rf /")]);
        let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
        assert!(matches!(err, RestoreError::MalformedContent { ref path, .. } if path == "daemon/scheduler/evil.txt"));
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn legacy_time_folder_restores_timesyncd() {
        let gateway = FakeGateway::new();
        let bytes = build(&[("ntp/timesyncd.conf", "[Time]\nNTP=ntp.iqrf.org\n")]);
        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert_eq!(outcome.namespaces, vec![Namespace::Time]);
        assert_eq!(outcome.restarts[0].service, "systemd-timesyncd");
        assert_eq!(
            fs::read_to_string(&gateway.settings.timesyncd_conf).unwrap(),
            "[Time]\nNTP=ntp.iqrf.org\n"
        );
        assert!(gateway.staging_is_empty());
    }

    #[test]
    fn current_time_folder_wins_over_legacy_copy() {
        let gateway = FakeGateway::new();
        let bytes = build(&[
            ("ntp/timesyncd.conf", "[Time]\nNTP=old.example\n"),
            ("timesyncd/timesyncd.conf", "[Time]\nNTP=new.example\n"),
        ]);
        restore(&gateway, Upload::zip(bytes)).unwrap();
        assert_eq!(
            fs::read_to_string(&gateway.settings.timesyncd_conf).unwrap(),
            "[Time]\nNTP=new.example\n"
        );
    }

    #[test]
    fn database_and_cloud_provisioning_round_trip() {
        let gateway = FakeGateway::new();
        let bytes = full_backup(&gateway);
        let before = gateway.digest();
        fs::remove_dir_all(gateway.settings.daemon_db_dir()).unwrap();
        fs::write(gateway.settings.cloud_provisioning_dir.join("config.json"), "{}").unwrap();

        let outcome = restore(&gateway, Upload::zip(bytes)).unwrap();
        assert!(outcome.namespaces.contains(&Namespace::DaemonDb));
        assert!(outcome.namespaces.contains(&Namespace::CloudProvisioning));
        assert!(outcome.restarts.iter().any(|r| r.service == "iqrf-cloud-provisioning"));
        assert_eq!(gateway.digest(), before);
        assert!(!gateway.settings.daemon_config_dir.join("DB").exists());
    }

    #[test]
    fn symlinked_monit_config_survives_round_trip() {
        use std::os::unix::fs::symlink;
        let gateway = FakeGateway::new();
        let link = gateway.settings.monit_dir.join("conf.d/nginx");
        symlink("../conf-available/nginx", &link).unwrap();
        let bytes = full_backup(&gateway);
        let before = gateway.digest();

        fs::remove_file(&link).unwrap();
        restore(&gateway, Upload::zip(bytes)).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), std::path::PathBuf::from("../conf-available/nginx"));
        assert_eq!(gateway.digest(), before);
    }

    #[test]
    fn symlink_in_place_of_a_checked_file_is_rejected() {
        let gateway = FakeGateway::new();
        let before = gateway.digest();
        for (path, target) in [
            ("daemon/iqrf__MqttMessaging.json", "/etc/shadow"),
            ("host/hostname", "/etc/shadow"),
            ("monit/conf.d", "/etc"),
        ] {
            let mut writer = ArchiveWriter::in_memory();
            writer.add_file(b"{}", "daemon/config.json").unwrap();
            writer.add_symlink(path, target).unwrap();
            let bytes = writer.close().unwrap().into_inner();
            let err = restore(&gateway, Upload::zip(bytes)).unwrap_err();
            assert!(matches!(err, RestoreError::MalformedContent { path: ref p, .. } if p == path), "{}", path);
            assert_eq!(gateway.digest(), before);
        }
    }

    #[test]
    fn lease_must_cover_the_scope() {
        let gateway = FakeGateway::new();
        let lease = gateway.lease(ConfigRoot::Scheduler);
        let err = RestoreCoordinator::new(&gateway.settings)
            .restore(&lease, Upload::zip(build(&[("mmonit", "x")])))
            .unwrap_err();
        assert!(matches!(err, RestoreError::Lease(LockError::Mismatch { .. })));
    }

    #[test]
    fn daemon_certificates_become_private() {
        use std::os::unix::fs::PermissionsExt;
        let gateway = FakeGateway::new();
        let bytes = build(&[("daemon/config.json", "{}"), ("daemon/certs/core/key.pem", "key")]);
        restore(&gateway, Upload::zip(bytes)).unwrap();
        let key = gateway.settings.daemon_config_dir.join("certs/core/key.pem");
        assert_eq!(fs::metadata(key).unwrap().permissions().mode() & 0o777, 0o600);
    }
}
