// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! Engine settings — where the live configuration tree lives on this host
//!
//! Loaded from a TOML file. Every field has a default matching a stock
//! gateway image so an empty or missing file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::archive::DEFAULT_SIZE_LIMIT;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/iqrf-gateway-webapp/backup.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Daemon component configuration (`iqrf__*.json`, `config.json`, certs/)
    pub daemon_config_dir: PathBuf,
    /// Daemon component JSON schemas (`schema__iqrf__*.json`)
    pub daemon_schema_dir: PathBuf,
    /// Daemon cache; the scheduler task store is `<cache>/scheduler`
    pub daemon_cache_dir: PathBuf,
    /// Daemon data; its `DB` subdirectory holds the network database
    pub daemon_data_dir: PathBuf,
    pub controller_dir: PathBuf,
    pub translator_dir: PathBuf,
    pub uploader_dir: PathBuf,
    pub cloud_provisioning_dir: PathBuf,
    pub mender_dir: PathBuf,
    pub monit_dir: PathBuf,
    pub pixla_dir: PathBuf,
    pub network_manager_dir: PathBuf,
    pub hostname_file: PathBuf,
    pub hosts_file: PathBuf,
    pub journald_conf: PathBuf,
    pub timesyncd_conf: PathBuf,
    /// Gateway metadata (`iqrf-gateway.json`), also the source of the gateway id
    pub gateway_info_file: PathBuf,
    /// Parent directory for restore staging areas
    pub staging_dir: PathBuf,
    /// `systemd`, `docker-supervisor`, or `auto` to detect at runtime
    pub init_system: String,
    pub lock_dir: PathBuf,
    /// Upper bound on the bytes an uploaded archive may expand to
    pub max_extracted_bytes: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            daemon_config_dir: PathBuf::from("/etc/iqrf-gateway-daemon"),
            daemon_schema_dir: PathBuf::from("/usr/share/iqrf-gateway-daemon/cfgSchemas"),
            daemon_cache_dir: PathBuf::from("/var/cache/iqrf-gateway-daemon"),
            daemon_data_dir: PathBuf::from("/usr/share/iqrf-gateway-daemon"),
            controller_dir: PathBuf::from("/etc/iqrf-gateway-controller"),
            translator_dir: PathBuf::from("/etc/iqrf-gateway-translator"),
            uploader_dir: PathBuf::from("/etc/iqrf-gateway-uploader"),
            cloud_provisioning_dir: PathBuf::from("/etc/iqrf-cloud-provisioning"),
            mender_dir: PathBuf::from("/etc/mender"),
            monit_dir: PathBuf::from("/etc/monit"),
            pixla_dir: PathBuf::from("/etc/gwman"),
            network_manager_dir: PathBuf::from("/etc/NetworkManager"),
            hostname_file: PathBuf::from("/etc/hostname"),
            hosts_file: PathBuf::from("/etc/hosts"),
            journald_conf: PathBuf::from("/etc/systemd/journald.conf"),
            timesyncd_conf: PathBuf::from("/etc/systemd/timesyncd.conf"),
            gateway_info_file: PathBuf::from("/etc/iqrf-gateway.json"),
            staging_dir: std::env::temp_dir(),
            init_system: "auto".to_string(),
            lock_dir: PathBuf::from("/run/lock/iqrf-gateway-backup"),
            max_extracted_bytes: DEFAULT_SIZE_LIMIT,
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file gives the defaults;
    /// an unreadable or invalid one is an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            warn!("Settings file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let settings: Settings = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Daemon network database
    pub fn daemon_db_dir(&self) -> PathBuf {
        self.daemon_data_dir.join("DB")
    }

    /// Scheduler task store
    pub fn scheduler_dir(&self) -> PathBuf {
        self.daemon_cache_dir.join("scheduler")
    }

    /// Schema directory of the scheduler task store
    pub fn scheduler_schema_dir(&self) -> PathBuf {
        self.scheduler_dir().join("schema")
    }
}
