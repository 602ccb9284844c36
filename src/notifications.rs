//! One-shot operator notifications.
//!
//! Distinct from alerts: a notification records that something happened
//! (a schedule failed, a job died); it is never week-scoped and carries no
//! resolution workflow.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::new_id;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct Notification {
    pub id: String,
    pub kind: String,
    pub schedule_id: Option<String>,
    pub schedule_type: Option<String>,
    pub entity_name: Option<String>,
    pub title: String,
    pub message: String,
    pub error: Option<String>,
    pub severity: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Record a failed scheduled execution so operators can observe it.
pub async fn schedule_failure(
    pool: &PgPool,
    schedule_id: Option<&str>,
    schedule_type: &str,
    entity_name: &str,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO notifications
             (id, kind, schedule_id, schedule_type, entity_name, title, message, error, severity)
         VALUES ($1, 'schedule_failure', $2, $3, $4, $5, $6, $7, 'error')",
    )
    .bind(&id)
    .bind(schedule_id)
    .bind(schedule_type)
    .bind(entity_name)
    .bind(format!("Schedule Failed: {}", entity_name))
    .bind(format!(
        "The {} schedule '{}' failed to execute.",
        schedule_type.replace('_', " "),
        entity_name
    ))
    .bind(error)
    .execute(pool)
    .await?;

    log::info!("created failure notification for {}", entity_name);
    Ok(())
}

pub async fn list(pool: &PgPool, unread_only: bool, limit: i64) -> Result<Vec<Notification>, sqlx::Error> {
    if unread_only {
        sqlx::query_as(
            "SELECT id, kind, schedule_id, schedule_type, entity_name, title, message, error,
                    severity, read, created_at
             FROM notifications WHERE read = FALSE ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    } else {
        sqlx::query_as(
            "SELECT id, kind, schedule_id, schedule_type, entity_name, title, message, error,
                    severity, read, created_at
             FROM notifications ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}

pub async fn mark_read(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
