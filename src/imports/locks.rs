//! Per-profile mutual exclusion.
//!
//! One row per profile in `import_locks`. A lock is acquirable when the row
//! is missing, expired, or already held by the same job (re-acquisition is
//! how a retried job resumes). Expiry is always checked against `now()` at
//! acquisition; the retention sweep merely garbage-collects stale rows.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::config::ORPHAN_TIMEOUT_SECS;

/// Lock TTL matches the orphan timeout: a dead worker's lock expires right
/// as its job becomes recoverable.
pub const LOCK_TTL_SECS: i64 = ORPHAN_TIMEOUT_SECS;

/// Try to take the profile lock for a job. Returns false on contention.
pub async fn acquire(
    pool: &PgPool,
    profile: &str,
    job_id: &str,
    worker_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO import_locks (profile, job_id, worker_id, acquired_at, expires_at)
         VALUES ($1, $2, $3, NOW(), NOW() + make_interval(secs => $4))
         ON CONFLICT (profile) DO UPDATE
         SET job_id = EXCLUDED.job_id,
             worker_id = EXCLUDED.worker_id,
             acquired_at = EXCLUDED.acquired_at,
             expires_at = EXCLUDED.expires_at
         WHERE import_locks.expires_at < NOW()
            OR import_locks.job_id = EXCLUDED.job_id",
    )
    .bind(profile)
    .bind(job_id)
    .bind(worker_id)
    .bind(LOCK_TTL_SECS as f64)
    .execute(pool)
    .await?;

    let acquired = result.rows_affected() > 0;
    if acquired {
        log::info!("acquired lock for profile {} (job {})", profile, job_id);
    }
    Ok(acquired)
}

/// Push the expiry forward; called from the heartbeat path.
pub async fn refresh(pool: &PgPool, profile: &str, job_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE import_locks
         SET expires_at = NOW() + make_interval(secs => $1)
         WHERE profile = $2 AND job_id = $3",
    )
    .bind(LOCK_TTL_SECS as f64)
    .bind(profile)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn release(pool: &PgPool, profile: &str, job_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM import_locks WHERE profile = $1 AND job_id = $2")
        .bind(profile)
        .bind(job_id)
        .execute(pool)
        .await?;
    log::info!("released lock for profile {}", profile);
    Ok(())
}

/// Drop any lock a job holds, regardless of profile. Orphan recovery path.
pub async fn release_by_job(pool: &PgPool, job_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM import_locks WHERE job_id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Garbage-collect expired rows. Correctness never depends on this.
pub async fn sweep_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM import_locks WHERE expires_at < NOW()")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
