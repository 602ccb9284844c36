//! Persistent import job queue.
//!
//! Jobs live in `import_jobs` and move through a small status machine:
//!
//! ```text
//! uploaded → processing → completed
//!               ↓
//!           pending_retry → processing → …
//!               ↓
//!            failed (after 3 attempts)
//! uploaded|pending_retry|processing → cancelled (operator)
//! ```
//!
//! Claiming is a single compare-and-set guarded by `FOR UPDATE SKIP LOCKED`
//! so concurrent worker processes never pick the same job. Liveness is a
//! heartbeat column; jobs whose heartbeat goes stale are recovered by the
//! orphan sweep at the start of every dispatch tick.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{MAX_ATTEMPTS, ORPHAN_TIMEOUT_SECS, retry_backoff_secs};
use crate::imports::locks;
use crate::store::new_id;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "import_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Uploaded,
    Processing,
    PendingRetry,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One entry in a job's attempt history.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttemptRecord {
    pub attempt: i32,
    pub worker_id: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Full job row, also the progress payload for the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct ImportJobRecord {
    pub job_id: String,
    pub profile: String,
    pub week_start: NaiveDate,
    pub file_path: String,
    pub file_checksum: Option<String>,
    pub original_filename: Option<String>,
    pub total_rows: Option<i32>,
    #[schemars(with = "Vec<String>")]
    pub headers: Json<Vec<String>>,
    #[schemars(with = "HashMap<String, String>")]
    pub suggested_mapping: Json<HashMap<String, String>>,
    #[schemars(with = "Option<HashMap<String, String>>")]
    pub column_mapping: Option<Json<HashMap<String, String>>>,
    pub status: JobStatus,
    pub attempts: i32,
    #[schemars(with = "Vec<AttemptRecord>")]
    pub attempt_history: Json<Vec<AttemptRecord>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub processed_rows: i32,
    pub contacts_created: i32,
    pub contacts_updated: i32,
    pub conflicts_count: i32,
    pub invalid_rows_count: i32,
    pub parse_failures_count: i32,
    pub progress_percent: f32,
    #[schemars(with = "HashMap<String, i64>")]
    pub persona_tally: Json<HashMap<String, i64>>,
    pub error_summary: Option<String>,
    #[schemars(with = "HashMap<String, i64>")]
    pub error_breakdown: Json<HashMap<String, i64>>,
    pub last_error: Option<String>,
    pub retry_after: Option<DateTime<Utc>>,
}

const JOB_COLUMNS: &str = "job_id, profile, week_start, file_path, file_checksum, \
     original_filename, total_rows, headers, suggested_mapping, column_mapping, status, \
     attempts, attempt_history, heartbeat_at, worker_id, started_at, completed_at, created_at, \
     processed_rows, contacts_created, contacts_updated, conflicts_count, invalid_rows_count, \
     parse_failures_count, progress_percent, persona_tally, error_summary, error_breakdown, \
     last_error, retry_after";

/// Counters written on every heartbeat.
#[derive(Debug, Default, Clone)]
pub struct Progress {
    pub processed_rows: i32,
    pub contacts_created: i32,
    pub contacts_updated: i32,
    pub conflicts_count: i32,
    pub invalid_rows_count: i32,
    pub parse_failures_count: i32,
    pub progress_percent: f32,
    pub persona_tally: HashMap<String, i64>,
}

pub struct ImportQueue {
    pool: PgPool,
}

impl ImportQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register an uploaded file as a new job in `uploaded` state.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_job(
        &self,
        profile: &str,
        week_start: NaiveDate,
        file_path: &str,
        file_checksum: &str,
        original_filename: &str,
        total_rows: i32,
        headers: &[String],
        suggested_mapping: &HashMap<String, String>,
    ) -> Result<String, sqlx::Error> {
        let job_id = new_id();
        sqlx::query(
            "INSERT INTO import_jobs
                 (job_id, profile, week_start, file_path, file_checksum, original_filename,
                  total_rows, headers, suggested_mapping)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&job_id)
        .bind(profile)
        .bind(week_start)
        .bind(file_path)
        .bind(file_checksum)
        .bind(original_filename)
        .bind(total_rows)
        .bind(Json(headers.to_vec()))
        .bind(Json(suggested_mapping.clone()))
        .execute(&self.pool)
        .await?;

        Ok(job_id)
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<ImportJobRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM import_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn list(
        &self,
        profile: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ImportJobRecord>, sqlx::Error> {
        match profile {
            Some(profile) => {
                sqlx::query_as(&format!(
                    "SELECT {JOB_COLUMNS} FROM import_jobs
                     WHERE profile = $1 ORDER BY created_at DESC LIMIT $2"
                ))
                .bind(profile)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {JOB_COLUMNS} FROM import_jobs ORDER BY created_at DESC LIMIT $1"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
    }

    /// True when the profile already has a job being processed. Used by the
    /// upload endpoint to reject concurrent imports early; the profile lock
    /// still protects the worker path if this check is bypassed.
    pub async fn has_active_job(&self, profile: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_jobs WHERE profile = $1 AND status = 'processing'",
        )
        .bind(profile)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Save the operator's column mapping; the job becomes claimable.
    pub async fn set_column_mapping(
        &self,
        job_id: &str,
        mapping: &HashMap<String, String>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs SET column_mapping = $1
             WHERE job_id = $2 AND status IN ('uploaded', 'pending_retry')",
        )
        .bind(Json(mapping.clone()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Claim the next runnable job (FIFO by created_at) in one CAS.
    ///
    /// Runnable means: mapping saved, and either freshly uploaded or a retry
    /// whose backoff has elapsed. Returns None when nothing is claimable.
    pub async fn claim_next(
        &self,
        worker_id: &str,
    ) -> Result<Option<ImportJobRecord>, sqlx::Error> {
        sqlx::query_as(&format!(
            "UPDATE import_jobs
             SET status = 'processing',
                 started_at = COALESCE(started_at, NOW()),
                 heartbeat_at = NOW(),
                 worker_id = $1
             WHERE job_id = (
                 SELECT job_id FROM import_jobs
                 WHERE column_mapping IS NOT NULL
                   AND (status = 'uploaded'
                        OR (status = 'pending_retry'
                            AND (retry_after IS NULL OR retry_after <= NOW())))
                 ORDER BY created_at
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Write a heartbeat with progress counters and refresh `worker_id`.
    pub async fn heartbeat(
        &self,
        job_id: &str,
        worker_id: &str,
        progress: &Progress,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs
             SET heartbeat_at = NOW(), worker_id = $1,
                 processed_rows = $2, contacts_created = $3, contacts_updated = $4,
                 conflicts_count = $5, invalid_rows_count = $6, parse_failures_count = $7,
                 progress_percent = $8, persona_tally = $9
             WHERE job_id = $10",
        )
        .bind(worker_id)
        .bind(progress.processed_rows)
        .bind(progress.contacts_created)
        .bind(progress.contacts_updated)
        .bind(progress.conflicts_count)
        .bind(progress.invalid_rows_count)
        .bind(progress.parse_failures_count)
        .bind(progress.progress_percent)
        .bind(Json(progress.persona_tally.clone()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn current_status(&self, job_id: &str) -> Result<Option<JobStatus>, sqlx::Error> {
        sqlx::query_scalar("SELECT status FROM import_jobs WHERE job_id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Cooperative cancel. Processing jobs stop at their next heartbeat.
    pub async fn cancel(&self, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE import_jobs
             SET status = 'cancelled', completed_at = NOW()
             WHERE job_id = $1 AND status IN ('uploaded', 'pending_retry', 'processing')",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal success: final counters plus the audit breakdown.
    pub async fn complete(
        &self,
        job_id: &str,
        progress: &Progress,
        error_breakdown: &HashMap<String, i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs
             SET status = 'completed', completed_at = NOW(), heartbeat_at = NOW(),
                 processed_rows = $1, contacts_created = $2, contacts_updated = $3,
                 conflicts_count = $4, invalid_rows_count = $5, parse_failures_count = $6,
                 progress_percent = 100, persona_tally = $7, error_breakdown = $8
             WHERE job_id = $9",
        )
        .bind(progress.processed_rows)
        .bind(progress.contacts_created)
        .bind(progress.contacts_updated)
        .bind(progress.conflicts_count)
        .bind(progress.invalid_rows_count)
        .bind(progress.parse_failures_count)
        .bind(Json(progress.persona_tally.clone()))
        .bind(Json(error_breakdown.clone()))
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Push a job back to `pending_retry` without burning an attempt.
    /// Used for lock contention, which is not a failure of the job itself.
    pub async fn defer(&self, job_id: &str, delay_secs: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE import_jobs
             SET status = 'pending_retry',
                 retry_after = NOW() + make_interval(secs => $1)
             WHERE job_id = $2 AND status = 'processing'",
        )
        .bind(delay_secs as f64)
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt and apply the retry policy: attempts < 3 go
    /// to `pending_retry` with backoff, the third strike is terminal.
    pub async fn record_attempt_failure(
        &self,
        job_id: &str,
        worker_id: &str,
        current_attempts: i32,
        error: &str,
    ) -> Result<JobStatus, sqlx::Error> {
        let next_attempt = current_attempts + 1;
        let record = AttemptRecord {
            attempt: next_attempt,
            worker_id: worker_id.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        };
        let entry = serde_json::to_value(vec![record]).unwrap_or_default();

        if next_attempt >= MAX_ATTEMPTS {
            sqlx::query(
                "UPDATE import_jobs
                 SET status = 'failed', completed_at = NOW(), attempts = $1,
                     attempt_history = attempt_history || $2::jsonb,
                     error_summary = $3, last_error = $3
                 WHERE job_id = $4",
            )
            .bind(next_attempt)
            .bind(&entry)
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(JobStatus::Failed)
        } else {
            let retry_after = Utc::now() + Duration::seconds(retry_backoff_secs(next_attempt));
            sqlx::query(
                "UPDATE import_jobs
                 SET status = 'pending_retry', attempts = $1,
                     attempt_history = attempt_history || $2::jsonb,
                     last_error = $3, retry_after = $4
                 WHERE job_id = $5",
            )
            .bind(next_attempt)
            .bind(&entry)
            .bind(error)
            .bind(retry_after)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            Ok(JobStatus::PendingRetry)
        }
    }

    /// Recover jobs whose worker died: stale or missing heartbeat while
    /// `processing`. Each recovered job releases any lock it still holds.
    pub async fn recover_orphans(&self) -> Result<Vec<String>, sqlx::Error> {
        let cutoff = Utc::now() - Duration::seconds(ORPHAN_TIMEOUT_SECS);

        let orphans: Vec<(String, i32, Option<String>)> = sqlx::query_as(
            "SELECT job_id, attempts, worker_id FROM import_jobs
             WHERE status = 'processing'
               AND (heartbeat_at IS NULL OR heartbeat_at < $1)
             LIMIT 100",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = Vec::new();
        for (job_id, attempts, worker_id) in orphans {
            let dead_worker = worker_id.unwrap_or_else(|| "unknown".to_string());
            let error = format!("worker {} died or timed out", dead_worker);

            let outcome = self
                .record_attempt_failure(&job_id, &dead_worker, attempts, &error)
                .await?;

            match outcome {
                JobStatus::Failed => {
                    sqlx::query(
                        "UPDATE import_jobs SET error_summary = $1 WHERE job_id = $2",
                    )
                    .bind(format!(
                        "exceeded max attempts ({}); last worker: {}",
                        MAX_ATTEMPTS, dead_worker
                    ))
                    .bind(&job_id)
                    .execute(&self.pool)
                    .await?;
                    log::warn!("orphaned job {} exceeded max attempts, failed", job_id);
                }
                _ => {
                    log::info!("orphaned job {} queued for retry", job_id);
                }
            }

            locks::release_by_job(&self.pool, &job_id).await?;
            recovered.push(job_id);
        }

        Ok(recovered)
    }
}
