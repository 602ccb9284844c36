//! Week-scoped, operator-resolvable alerts.
//!
//! An alert blocks a subsystem for the rest of the ISO week (rate limits,
//! quota exhaustion) and drives the corresponding traffic-light section to
//! red until an operator resolves it. The `(kind, week_key, persona)` key
//! makes repeated emission within one week idempotent.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::store::new_id;

pub const KIND_RATE_LIMIT: &str = "rate_limit";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct Alert {
    pub id: String,
    pub kind: String,
    pub week_key: String,
    pub buyer_persona_id: Option<String>,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Emit an alert for this week; a duplicate within the week is a no-op.
pub async fn emit(
    pool: &PgPool,
    kind: &str,
    week_key: &str,
    buyer_persona_id: Option<&str>,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO alerts (id, kind, week_key, buyer_persona_id, message)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (kind, week_key, buyer_persona_id) DO NOTHING",
    )
    .bind(new_id())
    .bind(kind)
    .bind(week_key)
    .bind(buyer_persona_id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Any unresolved alert of this kind for the week?
pub async fn has_open(
    pool: &PgPool,
    kind: &str,
    week_key: &str,
    buyer_persona_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = match buyer_persona_id {
        Some(persona) => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM alerts
                 WHERE kind = $1 AND week_key = $2 AND buyer_persona_id = $3 AND resolved = FALSE",
            )
            .bind(kind)
            .bind(week_key)
            .bind(persona)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT COUNT(*) FROM alerts
                 WHERE kind = $1 AND week_key = $2 AND resolved = FALSE",
            )
            .bind(kind)
            .bind(week_key)
            .fetch_one(pool)
            .await?
        }
    };
    Ok(count > 0)
}

pub async fn list_open(pool: &PgPool, limit: i64) -> Result<Vec<Alert>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, kind, week_key, buyer_persona_id, message, resolved, resolved_at, created_at
         FROM alerts WHERE resolved = FALSE ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn resolve(pool: &PgPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE alerts SET resolved = TRUE, resolved_at = NOW() WHERE id = $1 AND resolved = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
