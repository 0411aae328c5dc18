// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Namespace table — every slice of the configuration tree the engine knows
//!
//! Each namespace owns one folder (or one bare file) at the archive root and
//! maps to live paths, a content check, the services to restart and whether
//! the host must reboot. The set is closed; archive paths outside it are
//! ignored by restore.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::Settings;

/// Logical subsystem an operator toggles in a backup request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Iqrf,
    Mender,
    Monit,
    Pixla,
    Hostname,
    Journal,
    Network,
    Time,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Daemon,
    DaemonDb,
    Scheduler,
    Controller,
    Translator,
    Uploader,
    CloudProvisioning,
    Mender,
    Monit,
    MMonit,
    Pixla,
    Host,
    Journal,
    Network,
    Time,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `<name>/<relative path>`
    Folder,
    /// a bare `<name>` file at the archive root
    SingleFile,
}

/// How restore checks a file before accepting it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// daemon component: JSON checked against the component's schema
    Component,
    /// scheduler task: JSON checked against the task schema
    SchedulerTask,
    /// JSON syntax only
    Json,
    Opaque,
    /// never restored from an archive
    Skipped,
}

/// Where a namespace lives on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveTarget {
    /// A whole directory, replaced as one unit. Top-level names listed in
    /// `exclude` are neither archived nor restored; the live copies stay.
    /// Files below the `private` subdirectories are made owner-only.
    Directory {
        archive_dir: String,
        path: PathBuf,
        exclude: &'static [&'static str],
        private: &'static [&'static str],
    },
    File {
        archive_path: String,
        path: PathBuf,
    },
}

impl LiveTarget {
    pub fn archive_path(&self) -> &str {
        match self {
            LiveTarget::Directory { archive_dir, .. } => archive_dir,
            LiveTarget::File { archive_path, .. } => archive_path,
        }
    }

    pub fn live_path(&self) -> &PathBuf {
        match self {
            LiveTarget::Directory { path, .. } | LiveTarget::File { path, .. } => path,
        }
    }

    /// Same target with its archive location moved from `prefix` to the root
    pub fn rebased(self, prefix: &str) -> Self {
        let strip = |p: String| -> String {
            if p == prefix {
                String::new()
            } else {
                p.strip_prefix(&format!("{}/", prefix)).map(str::to_string).unwrap_or(p)
            }
        };
        match self {
            LiveTarget::Directory { archive_dir, path, exclude, private } => {
                LiveTarget::Directory { archive_dir: strip(archive_dir), path, exclude, private }
            }
            LiveTarget::File { archive_path, path } => LiveTarget::File { archive_path: strip(archive_path), path },
        }
    }
}

fn dir(
    archive_dir: &str,
    path: PathBuf,
    exclude: &'static [&'static str],
    private: &'static [&'static str],
) -> LiveTarget {
    LiveTarget::Directory { archive_dir: archive_dir.to_string(), path, exclude, private }
}

fn file(archive_path: &str, path: PathBuf) -> LiveTarget {
    LiveTarget::File { archive_path: archive_path.to_string(), path }
}

impl Namespace {
    pub fn all() -> &'static [Namespace] {
        &[
            Namespace::Daemon,
            Namespace::DaemonDb,
            Namespace::Scheduler,
            Namespace::Controller,
            Namespace::Translator,
            Namespace::Uploader,
            Namespace::CloudProvisioning,
            Namespace::Mender,
            Namespace::Monit,
            Namespace::MMonit,
            Namespace::Pixla,
            Namespace::Host,
            Namespace::Journal,
            Namespace::Network,
            Namespace::Time,
            Namespace::Metadata,
        ]
    }

    /// Folder (or file) name at the archive root
    pub fn archive_name(&self) -> &'static str {
        match self {
            Namespace::Daemon => "daemon",
            Namespace::DaemonDb => "daemon/DB",
            Namespace::Scheduler => "daemon/scheduler",
            Namespace::Controller => "controller",
            Namespace::Translator => "translator",
            Namespace::Uploader => "uploader",
            Namespace::CloudProvisioning => "cloudProv",
            Namespace::Mender => "mender",
            Namespace::Monit => "monit",
            Namespace::MMonit => "mmonit",
            Namespace::Pixla => "pixla",
            Namespace::Host => "host",
            Namespace::Journal => "journal",
            Namespace::Network => "nm",
            Namespace::Time => "timesyncd",
            Namespace::Metadata => "gateway",
        }
    }

    /// Older folder names still accepted on restore
    pub fn legacy_names(&self) -> &'static [&'static str] {
        match self {
            Namespace::Time => &["ntp"],
            _ => &[],
        }
    }

    pub fn layout(&self) -> Layout {
        match self {
            Namespace::MMonit => Layout::SingleFile,
            _ => Layout::Folder,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            Namespace::Daemon
            | Namespace::DaemonDb
            | Namespace::Scheduler
            | Namespace::Controller
            | Namespace::Translator
            | Namespace::Uploader
            | Namespace::CloudProvisioning => Subsystem::Iqrf,
            Namespace::Mender => Subsystem::Mender,
            Namespace::Monit | Namespace::MMonit => Subsystem::Monit,
            Namespace::Pixla => Subsystem::Pixla,
            Namespace::Host => Subsystem::Hostname,
            Namespace::Journal => Subsystem::Journal,
            Namespace::Network => Subsystem::Network,
            Namespace::Time => Subsystem::Time,
            Namespace::Metadata => Subsystem::Metadata,
        }
    }

    /// Services to restart once this namespace has been restored
    pub fn services(&self) -> &'static [&'static str] {
        match self {
            Namespace::Daemon | Namespace::DaemonDb | Namespace::Scheduler => &["iqrf-gateway-daemon"],
            Namespace::Controller => &["iqrf-gateway-controller"],
            Namespace::Translator => &["iqrf-gateway-translator"],
            Namespace::Uploader => &["iqrf-gateway-uploader"],
            Namespace::CloudProvisioning => &["iqrf-cloud-provisioning"],
            Namespace::Mender => &["mender-client", "mender-connect"],
            Namespace::Monit | Namespace::MMonit => &["monit"],
            Namespace::Pixla => &["gwman-client"],
            Namespace::Host => &["systemd-hostnamed"],
            Namespace::Journal => &["systemd-journald"],
            Namespace::Network => &["NetworkManager"],
            Namespace::Time => &["systemd-timesyncd"],
            Namespace::Metadata => &[],
        }
    }

    /// Host name and network changes only take full effect after a reboot
    pub fn requires_reboot(&self) -> bool {
        matches!(self, Namespace::Host | Namespace::Network)
    }

    /// Content check for a file at `relative` inside this namespace
    pub fn content_kind(&self, relative: &str) -> ContentKind {
        let top_level = !relative.contains('/');
        let is_json = relative.ends_with(".json");
        match self {
            Namespace::Daemon if top_level && is_component_file(relative) => ContentKind::Component,
            Namespace::Daemon if top_level && is_json => ContentKind::Json,
            Namespace::Scheduler if relative == "schema" || relative.starts_with("schema/") => {
                ContentKind::Skipped
            }
            Namespace::Scheduler => ContentKind::SchedulerTask,
            Namespace::Controller | Namespace::Translator | Namespace::Uploader if relative == "config.json" => {
                ContentKind::Json
            }
            Namespace::Mender if relative == "mender.conf" || relative == "mender-connect.conf" => {
                ContentKind::Json
            }
            Namespace::Metadata if relative == "iqrf-gateway.json" => ContentKind::Json,
            _ => ContentKind::Opaque,
        }
    }

    /// Finds the namespace owning `archive_path` and the path inside it.
    /// Nested namespaces win over their parent; legacy folder names count.
    pub fn locate(archive_path: &str) -> Option<(Namespace, String)> {
        let path = archive_path.trim_matches('/');
        Namespace::all()
            .iter()
            .flat_map(|ns| {
                std::iter::once(ns.archive_name())
                    .chain(ns.legacy_names().iter().copied())
                    .map(move |name| (*ns, name))
            })
            .filter_map(|(ns, name)| {
                let relative = match ns.layout() {
                    Layout::SingleFile if path == name => Some(String::new()),
                    Layout::Folder => path
                        .strip_prefix(name)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .filter(|rest| !rest.is_empty())
                        .map(str::to_string),
                    _ => None,
                };
                relative.map(|relative| (ns, name.len(), relative))
            })
            .max_by_key(|(_, len, _)| *len)
            .map(|(ns, _, relative)| (ns, relative))
    }

    /// Where a file at `relative` inside this namespace sits in an archive
    pub fn archive_path_of(&self, relative: &str) -> String {
        match self.layout() {
            Layout::SingleFile => self.archive_name().to_string(),
            Layout::Folder => format!("{}/{}", self.archive_name(), relative),
        }
    }

    /// Live locations of this namespace, in archive layout
    pub fn targets(&self, settings: &Settings) -> Vec<LiveTarget> {
        match self {
            Namespace::Daemon => {
                vec![dir("daemon", settings.daemon_config_dir.clone(), &["scheduler", "DB"], &["certs/core"])]
            }
            Namespace::DaemonDb => vec![dir("daemon/DB", settings.daemon_db_dir(), &[], &[])],
            Namespace::Scheduler => vec![dir("daemon/scheduler", settings.scheduler_dir(), &["schema"], &[])],
            Namespace::Controller => vec![dir("controller", settings.controller_dir.clone(), &[], &[])],
            Namespace::Translator => vec![dir("translator", settings.translator_dir.clone(), &[], &[])],
            Namespace::Uploader => vec![dir("uploader", settings.uploader_dir.clone(), &[], &[])],
            Namespace::CloudProvisioning => {
                vec![dir("cloudProv", settings.cloud_provisioning_dir.clone(), &[], &[])]
            }
            Namespace::Mender => vec![
                file("mender/mender.conf", settings.mender_dir.join("mender.conf")),
                file("mender/mender-connect.conf", settings.mender_dir.join("mender-connect.conf")),
            ],
            Namespace::Monit => vec![
                file("monit/monitrc", settings.monit_dir.join("monitrc")),
                dir("monit/conf.d", settings.monit_dir.join("conf.d"), &[], &[]),
            ],
            Namespace::MMonit => vec![file("mmonit", settings.monit_dir.join("mmonit"))],
            Namespace::Pixla => vec![dir("pixla", settings.pixla_dir.clone(), &[], &[])],
            Namespace::Host => vec![
                file("host/hostname", settings.hostname_file.clone()),
                file("host/hosts", settings.hosts_file.clone()),
            ],
            Namespace::Journal => vec![file("journal/journald.conf", settings.journald_conf.clone())],
            Namespace::Network => vec![
                file("nm/NetworkManager.conf", settings.network_manager_dir.join("NetworkManager.conf")),
                dir("nm/system-connections", settings.network_manager_dir.join("system-connections"), &[], &[""]),
            ],
            Namespace::Time => vec![file("timesyncd/timesyncd.conf", settings.timesyncd_conf.clone())],
            Namespace::Metadata => vec![file("gateway/iqrf-gateway.json", settings.gateway_info_file.clone())],
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.archive_name())
    }
}

/// `iqrf__MqttMessaging.json`, `iqrf__MqttMessaging_Aws.json`, `shape_ext__Tracer.json`, ...
fn is_component_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".json") else {
        return false;
    };
    let Some((domain, kind)) = stem.split_once("__") else {
        return false;
    };
    let word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    word(domain) && word(kind)
}
