// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! IQRF Gateway Backup — configuration backup, restore and migration engine
//!
//! Snapshots selected parts of a gateway's configuration into a ZIP archive
//! and restores such archives after validating every file against the
//! daemon's JSON schemas. Runs as a small REST service for the web panel or
//! as a one-shot command.

mod api;
mod archive;
mod backup;
mod config;
mod error;
mod fsutil;
mod lock;
mod migration;
mod namespace;
mod restore;
mod schema;
mod services;
#[cfg(test)]
mod test_support;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use actix_web::{App, HttpServer, web};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use crate::archive::{ArchiveReader, OpenMode};
use crate::backup::{BackupOrchestrator, BackupSelection};
use crate::config::Settings;
use crate::lock::{ConfigLock, ConfigRoot};
use crate::migration::{MigrationArchive, MigrationManager, SchedulerMigrationManager};
use crate::namespace::{LiveTarget, Namespace};
use crate::restore::{RestoreCoordinator, RestoreOutcome, Upload};

/// IQRF Gateway configuration backup and restore
#[derive(Parser)]
#[command(name = "iqrf-gateway-backup", version, about = "Backup, restore and migrate IQRF Gateway configuration")]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the REST API
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8090)]
        port: u16,

        /// Bind address
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Write a backup archive
    Backup {
        /// Software subsystems: iqrf, mender, monit, pixla
        #[arg(long, value_delimiter = ',')]
        software: Vec<String>,

        /// System subsystems: hostname, journal, network, time, metadata
        #[arg(long, value_delimiter = ',')]
        system: Vec<String>,

        /// Everything
        #[arg(long)]
        all: bool,

        /// Output file or directory (defaults to the generated name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },
    /// Restore a backup archive
    Restore {
        file: PathBuf,

        /// Only replace files; do not restart services
        #[arg(long)]
        no_restart: bool,
    },
    /// List what an archive holds without touching the gateway
    Inspect {
        file: PathBuf,

        /// Print one entry instead of the listing
        #[arg(short, long)]
        entry: Option<String>,
    },
    /// Export or import a single configuration root
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    Export {
        target: MigrationTarget,

        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        force: bool,
    },
    Import {
        target: MigrationTarget,

        file: PathBuf,

        #[arg(long)]
        no_restart: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MigrationTarget {
    /// Daemon configuration directory
    Daemon,
    /// Scheduler task store
    Scheduler,
}

impl MigrationTarget {
    fn root(&self) -> ConfigRoot {
        match self {
            MigrationTarget::Daemon => ConfigRoot::Daemon,
            MigrationTarget::Scheduler => ConfigRoot::Scheduler,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("iqrf_gateway_backup=info".parse()?)
                .add_directive("actix_web=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Serve { port, bind } => {
            actix_web::rt::System::new().block_on(serve(settings, bind, port))?;
        }
        Command::Backup { software, system, all, output, force } => {
            let selection = if all {
                BackupSelection::everything()
            } else {
                let mut selection = BackupSelection::default();
                for name in software.iter().chain(system.iter()) {
                    selection.set(name).map_err(anyhow::Error::msg)?;
                }
                selection
            };
            let mode = if force { OpenMode::Overwrite } else { OpenMode::Create };
            let destination = output.unwrap_or_else(|| PathBuf::from("."));
            let lease = ConfigLock::new(&settings.lock_dir).acquire(ConfigRoot::Gateway)?;
            let written = BackupOrchestrator::new(&settings)
                .backup_to_file(&lease, &selection, &destination, mode)
                .map_err(|e| anyhow::anyhow!("backup failed ({}): {}", e.kind(), e))?;
            println!("{}  {}", written.sha256, written.path.display());
        }
        Command::Inspect { file, entry } => inspect(&settings, &file, entry.as_deref())?,
        Command::Restore { file, no_restart } => {
            let bytes = fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let lease = ConfigLock::new(&settings.lock_dir).acquire(ConfigRoot::Gateway)?;
            let outcome = RestoreCoordinator::new(&settings)
                .restore(&lease, Upload::zip(bytes))
                .map_err(|e| anyhow::anyhow!("restore rejected ({}): {}", e.kind(), e))?;
            finish_restore(&outcome, no_restart);
        }
        Command::Migrate { action } => migrate(&settings, action)?,
    }
    Ok(())
}

fn migrate(settings: &Settings, action: MigrateAction) -> anyhow::Result<()> {
    let lock = ConfigLock::new(&settings.lock_dir);
    match action {
        MigrateAction::Export { target, output, force } => {
            let lease = lock.acquire(target.root())?;
            let archive: MigrationArchive = match target {
                MigrationTarget::Daemon => MigrationManager::new(settings).download(&lease)?,
                MigrationTarget::Scheduler => SchedulerMigrationManager::new(settings).download(&lease)?,
            };
            let path = write_output(output.as_deref(), &archive.file_name, &archive.bytes, force)?;
            println!("{}  {}", archive.sha256, path.display());
        }
        MigrateAction::Import { target, file, no_restart } => {
            let bytes = fs::read(&file).with_context(|| format!("failed to read {}", file.display()))?;
            let lease = lock.acquire(target.root())?;
            let upload = Upload::zip(bytes);
            let outcome = match target {
                MigrationTarget::Daemon => MigrationManager::new(settings).upload(&lease, upload),
                MigrationTarget::Scheduler => SchedulerMigrationManager::new(settings).upload(&lease, upload),
            }
            .map_err(|e| anyhow::anyhow!("import rejected ({}): {}", e.kind(), e))?;
            finish_restore(&outcome, no_restart);
        }
    }
    Ok(())
}

fn inspect(settings: &Settings, file: &Path, entry: Option<&str>) -> anyhow::Result<()> {
    let mut reader = ArchiveReader::open(file).with_context(|| format!("failed to open {}", file.display()))?;
    if let Some(name) = entry {
        let bytes = reader.read_file(name)?;
        std::io::stdout().write_all(&bytes)?;
        return Ok(());
    }

    for ns in Namespace::all() {
        let wanted: Vec<String> = ns
            .targets(settings)
            .iter()
            .map(|target| match target {
                LiveTarget::Directory { .. } => format!("{}/", target.archive_path()),
                LiveTarget::File { .. } => target.archive_path().to_string(),
            })
            .collect();
        if reader.exists_all(&wanted) {
            println!("{:<20} complete", ns.archive_name());
        } else if wanted.iter().any(|path| reader.exists(path)) {
            println!("{:<20} partial", ns.archive_name());
        }
    }
    for path in reader.list_files() {
        let known = if Namespace::locate(&path).is_some() { " " } else { "?" };
        println!("{} {}", known, path);
    }
    Ok(())
}

/// `output` may name a file or an existing directory
fn write_output(output: Option<&Path>, file_name: &str, bytes: &[u8], force: bool) -> anyhow::Result<PathBuf> {
    let path = match output {
        Some(p) if p.is_dir() => p.join(file_name),
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(file_name),
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}

fn finish_restore(outcome: &RestoreOutcome, no_restart: bool) {
    if no_restart {
        for cmd in &outcome.restarts {
            println!("restart pending: {}", cmd);
        }
    } else {
        let failed = services::restart_all(&outcome.restarts);
        if !failed.is_empty() {
            warn!("Failed to restart: {}", failed.join(", "));
        }
    }
    if outcome.reboot_required {
        println!("reboot required");
    }
}

async fn serve(settings: Settings, bind: String, port: u16) -> std::io::Result<()> {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    info!("");
    info!("  IQRF Gateway Backup v{}", env!("CARGO_PKG_VERSION"));
    info!("  ──────────────────────────────────");
    info!("  Hostname:   {}", hostname);
    info!("  Gateway ID: {}", backup::gateway_id(&settings));
    info!("  Daemon:     {}", settings.daemon_config_dir.display());
    info!("  Schemas:    {}", settings.daemon_schema_dir.display());
    info!("  Init:       {}", services::InitSystem::from_setting(&settings.init_system));
    info!("  API:        http://{}:{}/api", bind, port);
    info!("");

    let app_state = web::Data::new(api::AppState::new(settings));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(api::configure)
    })
    .bind(format!("{}:{}", bind, port))?
    .run()
    .await
}
