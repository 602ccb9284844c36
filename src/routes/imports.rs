//! LinkedIn import job lifecycle endpoints.
//!
//! Upload and preview run synchronously; `start` only saves the column
//! mapping and leaves the job for the worker, so the request returns
//! immediately with `{status: queued}`. Progress, cancellation, and the
//! audit-row listings read straight from the job store.
//!
//! The upload and CSV-download handlers are mounted outside the OpenAPI
//! route set: multipart bodies and raw CSV responses have no schema.

use rocket::State;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::ContentType;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Read;

use crate::auth::AuthenticatedUser;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::imports::audit::{self, AuditKind, AuditRow};
use crate::imports::csv_stream::{CsvFile, MAPPABLE_FIELDS, suggest_mapping};
use crate::imports::queue::{ImportJobRecord, ImportQueue, JobStatus};
use crate::imports::{PROFILES, is_valid_profile};
use crate::models::{ApiResponse, MessageResponse};
use crate::store::new_id;
use crate::week::current_week_start;

#[derive(Debug, FromForm)]
pub struct UploadForm<'r> {
    pub profile: String,
    pub file: TempFile<'r>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct UploadResponse {
    pub job_id: String,
    pub total_rows: usize,
    pub headers: Vec<String>,
    pub suggested_mapping: HashMap<String, String>,
}

/// Multipart CSV upload. Registers the job in `uploaded` state.
#[post("/linkedin-import/upload", data = "<upload>")]
pub async fn upload_csv(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    config: &State<AppConfig>,
    mut upload: Form<UploadForm<'_>>,
) -> Result<Json<ApiResponse<UploadResponse>>, ApiError> {
    let profile = upload.profile.to_uppercase();
    if !is_valid_profile(&profile) {
        return Err(ApiError::BadRequest(format!(
            "unknown profile '{}', expected one of {:?}",
            profile,
            PROFILES.iter().map(|(code, _)| *code).collect::<Vec<_>>()
        )));
    }

    let queue = ImportQueue::new(pool.inner().clone());
    if queue.has_active_job(&profile).await? {
        return Err(ApiError::Conflict(format!(
            "an import for profile {} is already processing",
            profile
        )));
    }

    let original_filename = upload
        .file
        .raw_name()
        .map(|n| n.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_else(|| "connections.csv".to_string());
    if !original_filename.to_lowercase().ends_with(".csv") {
        return Err(ApiError::BadRequest("only .csv files are accepted".to_string()));
    }

    std::fs::create_dir_all(&config.upload_dir)
        .map_err(|e| ApiError::InternalError(format!("upload dir: {e}")))?;
    let file_path = config.upload_dir.join(format!("{}.csv", new_id()));
    // copy_to instead of persist_to: the spool directory may be on a
    // different filesystem than the multipart temp dir.
    upload
        .file
        .copy_to(&file_path)
        .await
        .map_err(|e| ApiError::InternalError(format!("could not persist upload: {e}")))?;

    let checksum = sha256_file(&file_path)
        .map_err(|e| ApiError::InternalError(format!("checksum: {e}")))?;

    let csv = CsvFile::open(&file_path)
        .map_err(|e| ApiError::BadRequest(format!("unreadable csv: {e}")))?;
    let total_rows = csv
        .count_rows()
        .map_err(|e| ApiError::BadRequest(format!("unreadable csv: {e}")))?;
    let headers = csv.headers().to_vec();
    let suggested = suggest_mapping(&headers);

    let job_id = queue
        .create_job(
            &profile,
            current_week_start(),
            &file_path.to_string_lossy(),
            &checksum,
            &original_filename,
            total_rows as i32,
            &headers,
            &suggested,
        )
        .await?;

    log::info!(
        "job {}: uploaded {} rows for profile {}",
        job_id,
        total_rows,
        profile
    );

    Ok(Json(ApiResponse::new(UploadResponse {
        job_id,
        total_rows,
        headers,
        suggested_mapping: suggested,
    })))
}

fn sha256_file(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PreviewResponse {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub suggested_mapping: HashMap<String, String>,
    pub saved_mapping: Option<HashMap<String, String>>,
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs/<job_id>/preview")]
pub async fn preview(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<ApiResponse<PreviewResponse>>, ApiError> {
    let queue = ImportQueue::new(pool.inner().clone());
    let job = queue
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("import job '{job_id}' not found")))?;

    let csv = CsvFile::open(&job.file_path)
        .map_err(|e| ApiError::BadRequest(format!("source file unavailable: {e}")))?;
    let rows = csv
        .preview(50)
        .map_err(|e| ApiError::BadRequest(format!("unreadable csv: {e}")))?;

    Ok(Json(ApiResponse::new(PreviewResponse {
        headers: job.headers.0.clone(),
        rows,
        suggested_mapping: job.suggested_mapping.0.clone(),
        saved_mapping: job.column_mapping.as_ref().map(|m| m.0.clone()),
    })))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct StartRequest {
    pub column_mapping: HashMap<String, String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct StartResponse {
    pub status: String,
}

/// Save the mapping and queue the job. No synchronous processing.
#[openapi(tag = "LinkedIn Import")]
#[post("/linkedin-import/jobs/<job_id>/start", data = "<request>")]
pub async fn start(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
    request: Json<StartRequest>,
) -> Result<Json<ApiResponse<StartResponse>>, ApiError> {
    let mapping = &request.column_mapping;
    if mapping.is_empty() {
        return Err(ApiError::BadRequest("column_mapping is required".to_string()));
    }
    for field in mapping.values() {
        if !MAPPABLE_FIELDS.contains(&field.as_str()) {
            return Err(ApiError::BadRequest(format!("unknown field '{field}'")));
        }
    }
    let has_identifier = mapping
        .values()
        .any(|f| f == "email" || f == "linkedin_url" || f == "first_name" || f == "last_name");
    if !has_identifier {
        return Err(ApiError::BadRequest(
            "mapping must include a name, email, or linkedin_url column".to_string(),
        ));
    }

    let queue = ImportQueue::new(pool.inner().clone());
    if queue.get(job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("import job '{job_id}' not found")));
    }
    if !queue.set_column_mapping(job_id, mapping).await? {
        return Err(ApiError::Conflict(
            "job is not in a startable state".to_string(),
        ));
    }

    Ok(Json(ApiResponse::new(StartResponse {
        status: "queued".to_string(),
    })))
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs/<job_id>")]
pub async fn progress(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<ApiResponse<ImportJobRecord>>, ApiError> {
    let queue = ImportQueue::new(pool.inner().clone());
    let job = queue
        .get(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("import job '{job_id}' not found")))?;
    Ok(Json(ApiResponse::new(job)))
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs?<profile>&<limit>")]
pub async fn list_jobs(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    profile: Option<String>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<Vec<ImportJobRecord>>>, ApiError> {
    if let Some(profile) = &profile {
        if !is_valid_profile(profile) {
            return Err(ApiError::BadRequest(format!("unknown profile '{profile}'")));
        }
    }
    let queue = ImportQueue::new(pool.inner().clone());
    let jobs = queue
        .list(profile.as_deref(), limit.unwrap_or(25).clamp(1, 100))
        .await?;
    Ok(Json(ApiResponse::new(jobs)))
}

#[openapi(tag = "LinkedIn Import")]
#[post("/linkedin-import/jobs/<job_id>/cancel")]
pub async fn cancel(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let queue = ImportQueue::new(pool.inner().clone());
    if queue.get(job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("import job '{job_id}' not found")));
    }
    if !queue.cancel(job_id).await? {
        return Err(ApiError::Conflict("job already finished".to_string()));
    }
    Ok(Json(MessageResponse::ok("cancellation requested")))
}

/// Per-profile summary of this week's import, for the semaphore panel.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ProfileWeekStatus {
    pub profile: String,
    pub display_name: String,
    pub current_job: Option<ImportJobRecord>,
    pub import_completed: bool,
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/status")]
pub async fn weekly_status(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
) -> Result<Json<ApiResponse<Vec<ProfileWeekStatus>>>, ApiError> {
    let queue = ImportQueue::new(pool.inner().clone());
    let week = current_week_start();

    let mut out = Vec::with_capacity(PROFILES.len());
    for (profile, display_name) in PROFILES {
        let current_job = queue
            .list(Some(profile), 10)
            .await?
            .into_iter()
            .find(|job| job.week_start == week);

        let import_completed = current_job
            .as_ref()
            .map(|job| job.status == JobStatus::Completed)
            .unwrap_or(false);

        out.push(ProfileWeekStatus {
            profile: profile.to_string(),
            display_name: display_name.to_string(),
            current_job,
            import_completed,
        });
    }

    Ok(Json(ApiResponse::new(out)))
}

async fn audit_rows(
    pool: &PgPool,
    kind: AuditKind,
    job_id: &str,
) -> Result<Vec<AuditRow>, ApiError> {
    let queue = ImportQueue::new(pool.clone());
    if queue.get(job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("import job '{job_id}' not found")));
    }
    Ok(audit::list_for_job(pool, kind, job_id, 5000).await?)
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs/<job_id>/conflicts")]
pub async fn conflicts(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<ApiResponse<Vec<AuditRow>>>, ApiError> {
    Ok(Json(ApiResponse::new(
        audit_rows(pool.inner(), AuditKind::Conflict, job_id).await?,
    )))
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs/<job_id>/invalid-rows")]
pub async fn invalid_rows(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<ApiResponse<Vec<AuditRow>>>, ApiError> {
    Ok(Json(ApiResponse::new(
        audit_rows(pool.inner(), AuditKind::InvalidRow, job_id).await?,
    )))
}

#[openapi(tag = "LinkedIn Import")]
#[get("/linkedin-import/jobs/<job_id>/parse-failures")]
pub async fn parse_failures(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<Json<ApiResponse<Vec<AuditRow>>>, ApiError> {
    Ok(Json(ApiResponse::new(
        audit_rows(pool.inner(), AuditKind::ParseFailure, job_id).await?,
    )))
}

/// CSV download variant; mounted outside the OpenAPI set.
#[get("/linkedin-import/jobs/<job_id>/conflicts/download")]
pub async fn conflicts_csv(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<(ContentType, String), ApiError> {
    let rows = audit_rows(pool.inner(), AuditKind::Conflict, job_id).await?;
    Ok((ContentType::CSV, audit::to_csv(&rows)))
}

#[get("/linkedin-import/jobs/<job_id>/invalid-rows/download")]
pub async fn invalid_rows_csv(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<(ContentType, String), ApiError> {
    let rows = audit_rows(pool.inner(), AuditKind::InvalidRow, job_id).await?;
    Ok((ContentType::CSV, audit::to_csv(&rows)))
}

#[get("/linkedin-import/jobs/<job_id>/parse-failures/download")]
pub async fn parse_failures_csv(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    job_id: &str,
) -> Result<(ContentType, String), ApiError> {
    let rows = audit_rows(pool.inner(), AuditKind::ParseFailure, job_id).await?;
    Ok((ContentType::CSV, audit::to_csv(&rows)))
}
