//! Reclassification jobs: re-run the classifier over stored contacts.
//!
//! Keyword mutations never touch contacts inline; they enqueue a job here
//! instead. The drain claims one queued job per tick, walks contacts in
//! pages ordered by id, skips `persona_locked` records, and applies the
//! classifier through unordered bulk writes. Updates set the persona to the
//! computed value, so running the same job twice without dictionary changes
//! is a no-op.

use rocket_db_pools::sqlx::{self, PgPool, Row};
use serde_json::Value;

use super::{PersonaClassifier, classify_with_snapshot};
use crate::store::bulk::{self, BulkOp};
use crate::store::new_id;

const PAGE_SIZE: i64 = 1000;

#[derive(Debug, Clone)]
struct PersonaUpdate {
    contact_id: String,
    buyer_persona_id: String,
    buyer_persona_name: String,
    job_title_normalized: String,
}

fn build_ops(updates: &[PersonaUpdate]) -> Vec<BulkOp> {
    updates
        .iter()
        .cloned()
        .map(|update| {
            bulk::op(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "UPDATE contacts
                         SET buyer_persona = $1, buyer_persona_name = $2,
                             job_title_normalized = $3, updated_at = NOW()
                         WHERE id = $4 AND persona_locked = FALSE",
                    )
                    .bind(update.buyer_persona_id)
                    .bind(update.buyer_persona_name)
                    .bind(update.job_title_normalized)
                    .bind(update.contact_id)
                    .execute(&mut *conn)
                    .await?;
                    Ok(result.rows_affected())
                })
            })
        })
        .collect()
}

/// Enqueue a reclassification job. `filter` may carry `buyer_persona` to
/// restrict the sweep to contacts currently holding one persona.
pub async fn enqueue(pool: &PgPool, filter: Value) -> Result<String, sqlx::Error> {
    let id = new_id();
    sqlx::query("INSERT INTO reclassification_jobs (id, status, filter) VALUES ($1, 'queued', $2)")
        .bind(&id)
        .bind(&filter)
        .execute(pool)
        .await?;
    log::info!("reclassification job {} enqueued", id);
    Ok(id)
}

/// Claim and run at most one queued job. Returns the job id if one ran.
pub async fn drain_one(
    pool: &PgPool,
    classifier: &PersonaClassifier,
) -> Result<Option<String>, sqlx::Error> {
    let claimed: Option<(String, Value)> = sqlx::query_as(
        "UPDATE reclassification_jobs
         SET status = 'running', started_at = NOW()
         WHERE id = (
             SELECT id FROM reclassification_jobs
             WHERE status = 'queued'
             ORDER BY created_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED
         )
         RETURNING id, filter",
    )
    .fetch_optional(pool)
    .await?;

    let Some((job_id, filter)) = claimed else {
        return Ok(None);
    };

    log::info!("reclassification job {} claimed", job_id);

    match run_job(pool, classifier, &job_id, &filter).await {
        Ok((processed, updated, skipped)) => {
            sqlx::query(
                "UPDATE reclassification_jobs
                 SET status = 'completed', completed_at = NOW(),
                     processed = $1, updated = $2, skipped_locked = $3
                 WHERE id = $4",
            )
            .bind(processed as i32)
            .bind(updated as i32)
            .bind(skipped as i32)
            .bind(&job_id)
            .execute(pool)
            .await?;
            log::info!(
                "reclassification job {} complete: {} processed, {} updated, {} locked",
                job_id,
                processed,
                updated,
                skipped
            );
        }
        Err(e) => {
            log::error!("reclassification job {} failed: {}", job_id, e);
            sqlx::query(
                "UPDATE reclassification_jobs
                 SET status = 'failed', completed_at = NOW(), error = $1
                 WHERE id = $2",
            )
            .bind(e.to_string())
            .bind(&job_id)
            .execute(pool)
            .await?;
        }
    }

    Ok(Some(job_id))
}

async fn run_job(
    pool: &PgPool,
    classifier: &PersonaClassifier,
    job_id: &str,
    filter: &Value,
) -> Result<(usize, usize, usize), sqlx::Error> {
    let persona_filter = filter
        .get("buyer_persona")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let snapshot = classifier.cache().snapshot(pool).await?;

    let mut cursor = String::new();
    let mut processed = 0usize;
    let mut updated = 0usize;

    // Locked contacts are excluded from the page query; count them once up
    // front so the job document reports what the sweep did not touch.
    let skipped_locked: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE persona_locked = TRUE")
            .fetch_one(pool)
            .await?;

    loop {
        let rows = match &persona_filter {
            Some(persona) => {
                sqlx::query(
                    "SELECT id, job_title, buyer_persona
                     FROM contacts
                     WHERE id > $1 AND persona_locked = FALSE AND buyer_persona = $2
                     ORDER BY id LIMIT $3",
                )
                .bind(&cursor)
                .bind(persona)
                .bind(PAGE_SIZE)
                .fetch_all(pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, job_title, buyer_persona
                     FROM contacts
                     WHERE id > $1 AND persona_locked = FALSE
                     ORDER BY id LIMIT $2",
                )
                .bind(&cursor)
                .bind(PAGE_SIZE)
                .fetch_all(pool)
                .await?
            }
        };

        if rows.is_empty() {
            break;
        }

        let mut pending: Vec<PersonaUpdate> = Vec::new();

        for row in &rows {
            let contact_id: String = row.get("id");
            let job_title: Option<String> = row.get("job_title");
            let current_persona: Option<String> = row.get("buyer_persona");
            cursor = contact_id.clone();
            processed += 1;

            let title = job_title.unwrap_or_default();
            let classification = classify_with_snapshot(&snapshot, &title);

            if current_persona.as_deref() == Some(classification.buyer_persona_id.as_str()) {
                continue;
            }

            pending.push(PersonaUpdate {
                contact_id,
                buyer_persona_id: classification.buyer_persona_id,
                buyer_persona_name: classification.buyer_persona_name,
                job_title_normalized: classification.normalized_job_title,
            });
        }

        if !pending.is_empty() {
            // One retry per batch; persistent store failure fails the job.
            let report = match bulk::unordered(pool, build_ops(&pending)).await {
                Ok(report) => report,
                Err(first) => {
                    log::warn!(
                        "reclassification job {} batch failed, retrying: {}",
                        job_id,
                        first
                    );
                    bulk::unordered(pool, build_ops(&pending)).await?
                }
            };

            for error in report.errors() {
                log::warn!(
                    "reclassification job {} op {} failed: {}",
                    job_id,
                    error.index,
                    error.message
                );
            }
            updated += pending.len() - report.errors().count();
        }

        sqlx::query("UPDATE reclassification_jobs SET processed = $1, updated = $2 WHERE id = $3")
            .bind(processed as i32)
            .bind(updated as i32)
            .bind(job_id)
            .execute(pool)
            .await?;

        if rows.len() < PAGE_SIZE as usize {
            break;
        }
    }

    Ok((processed, updated, skipped_locked as usize))
}
