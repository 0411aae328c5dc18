// Written by the IQRF Gateway developers
// (C)Copyright IQRF Tech s.r.o.
// https://iqrf.org

//! REST API — download and upload endpoints for backups and migrations
//!
//! Handlers only translate HTTP to engine calls. All filesystem work runs
//! on the blocking pool under a lease on the configuration root it touches.

use actix_web::{HttpRequest, HttpResponse, http::StatusCode, web};
use tracing::{error, info, warn};

use crate::backup::{BackupError, BackupOrchestrator, BackupSelection};
use crate::config::Settings;
use crate::error::ErrorKind;
use crate::lock::{ConfigLock, ConfigRoot};
use crate::migration::{MigrationArchive, MigrationManager, SchedulerMigrationManager};
use crate::restore::{RestoreCoordinator, RestoreError, RestoreOutcome, Upload};
use crate::services;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub lock: ConfigLock,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let lock = ConfigLock::new(&settings.lock_dir);
        Self { settings, lock }
    }
}

// ─── Responses ───

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::EmptyInput
        | ErrorKind::MalformedContainer
        | ErrorKind::MalformedContent
        | ErrorKind::SchemaViolation => StatusCode::BAD_REQUEST,
        ErrorKind::UnsupportedInitSystem => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Busy => StatusCode::CONFLICT,
        ErrorKind::PartialApply | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, kind: ErrorKind, message: String) -> HttpResponse {
    if status.is_server_error() {
        error!("{}: {}", kind, message);
    } else {
        warn!("{}: {}", kind, message);
    }
    HttpResponse::build(status).json(serde_json::json!({
        "error": message,
        "kind": kind,
    }))
}

fn backup_error(e: BackupError) -> HttpResponse {
    error_response(status_for(e.kind()), e.kind(), e.to_string())
}

fn restore_error(e: RestoreError) -> HttpResponse {
    let status = match &e {
        RestoreError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => status_for(e.kind()),
    };
    let body = match &e {
        RestoreError::SchemaViolation { path, component, violations } => serde_json::json!({
            "error": e.to_string(),
            "kind": e.kind(),
            "path": path,
            "component": component,
            "violations": violations,
        }),
        _ => serde_json::json!({ "error": e.to_string(), "kind": e.kind() }),
    };
    if status.is_server_error() {
        error!("Restore failed: {}", e);
    } else {
        warn!("Restore rejected: {}", e);
    }
    HttpResponse::build(status).json(body)
}

fn blocking_error(e: actix_web::error::BlockingError) -> HttpResponse {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal, format!("Internal error: {}", e))
}

fn download(file_name: &str, bytes: Vec<u8>, sha256: &str) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/zip")
        .insert_header(("Content-Disposition", format!("attachment; filename=\"{}\"", file_name)))
        .insert_header(("X-Content-SHA256", sha256.to_string()))
        .body(bytes)
}

fn migration_download(result: Result<Result<MigrationArchive, BackupError>, actix_web::error::BlockingError>) -> HttpResponse {
    match result {
        Ok(Ok(archive)) => download(&archive.file_name, archive.bytes, &archive.sha256),
        Ok(Err(e)) => backup_error(e),
        Err(e) => blocking_error(e),
    }
}

fn content_type(req: &HttpRequest) -> String {
    req.headers()
        .get(actix_web::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// Runs the restarts a restore asked for, still under the lease
fn restart_services(outcome: RestoreOutcome) -> RestoreOutcome {
    let failed = services::restart_all(&outcome.restarts);
    if !failed.is_empty() {
        warn!("Configuration restored but {} services failed to restart", failed.len());
    }
    outcome
}

fn restore_result(result: Result<Result<RestoreOutcome, RestoreError>, actix_web::error::BlockingError>) -> HttpResponse {
    match result {
        Ok(Ok(outcome)) => HttpResponse::Ok().json(outcome),
        Ok(Err(e)) => restore_error(e),
        Err(e) => blocking_error(e),
    }
}

// ─── Backup & Restore ───

/// POST /api/backup — archive the selected subsystems
pub async fn create_backup(state: web::Data<AppState>, body: web::Json<BackupSelection>) -> HttpResponse {
    let selection = body.into_inner();
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Gateway)?;
        BackupOrchestrator::new(&state.settings).backup(&lease, &selection)
    })
    .await;

    match result {
        Ok(Ok(archive)) => {
            info!("Serving backup {}", archive.file_name);
            download(&archive.file_name, archive.bytes, &archive.sha256)
        }
        Ok(Err(e)) => backup_error(e),
        Err(e) => blocking_error(e),
    }
}

/// POST /api/restore — restore from an uploaded backup archive
pub async fn restore_backup(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let upload = Upload { content_type: content_type(&req), bytes: body.to_vec() };
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Gateway)?;
        let outcome = RestoreCoordinator::new(&state.settings).restore(&lease, upload)?;
        Ok::<_, RestoreError>(restart_services(outcome))
    })
    .await;
    restore_result(result)
}

// ─── Migration ───

/// GET /api/migration/daemon — export the daemon configuration
pub async fn export_daemon(state: web::Data<AppState>) -> HttpResponse {
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Daemon)?;
        MigrationManager::new(&state.settings).download(&lease)
    })
    .await;
    migration_download(result)
}

/// POST /api/migration/daemon — import a daemon configuration
pub async fn import_daemon(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let upload = Upload { content_type: content_type(&req), bytes: body.to_vec() };
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Daemon)?;
        let outcome = MigrationManager::new(&state.settings).upload(&lease, upload)?;
        Ok::<_, RestoreError>(restart_services(outcome))
    })
    .await;
    restore_result(result)
}

/// GET /api/migration/scheduler — export scheduler tasks
pub async fn export_scheduler(state: web::Data<AppState>) -> HttpResponse {
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Scheduler)?;
        SchedulerMigrationManager::new(&state.settings).download(&lease)
    })
    .await;
    migration_download(result)
}

/// POST /api/migration/scheduler — import scheduler tasks
pub async fn import_scheduler(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let upload = Upload { content_type: content_type(&req), bytes: body.to_vec() };
    let result = web::block(move || {
        let lease = state.lock.try_acquire(ConfigRoot::Scheduler)?;
        let outcome = SchedulerMigrationManager::new(&state.settings).upload(&lease, upload)?;
        Ok::<_, RestoreError>(restart_services(outcome))
    })
    .await;
    restore_result(result)
}

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .app_data(web::JsonConfig::default().limit(64 * 1024))
        // Backup & Restore
        .route("/api/backup", web::post().to(create_backup))
        .route("/api/restore", web::post().to(restore_backup))
        // Migration
        .route("/api/migration/daemon", web::get().to(export_daemon))
        .route("/api/migration/daemon", web::post().to(import_daemon))
        .route("/api/migration/scheduler", web::get().to(export_scheduler))
        .route("/api/migration/scheduler", web::post().to(import_scheduler));
}
