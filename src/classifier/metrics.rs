//! Periodic classifier metrics snapshot.

use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::{Map, Value};

use super::DEFAULT_PERSONA_ID;
use crate::store::new_id;

/// Write one `classifier_metrics` row with per-persona contact counts.
pub async fn snapshot(pool: &PgPool) -> Result<String, sqlx::Error> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
        .fetch_one(pool)
        .await?;

    let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
        "SELECT buyer_persona, COUNT(*) FROM contacts GROUP BY buyer_persona",
    )
    .fetch_all(pool)
    .await?;

    let mut per_persona = Map::new();
    let mut default_count = 0i64;
    for (persona, count) in rows {
        let key = persona.unwrap_or_else(|| "unclassified".to_string());
        if key == DEFAULT_PERSONA_ID {
            default_count = count;
        }
        per_persona.insert(key, Value::from(count));
    }

    let id = new_id();
    sqlx::query(
        "INSERT INTO classifier_metrics (id, total_contacts, per_persona, default_count)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(&id)
    .bind(total)
    .bind(Value::Object(per_persona))
    .bind(default_count)
    .execute(pool)
    .await?;

    log::info!(
        "classifier metrics snapshot {}: {} contacts, {} default",
        id,
        total,
        default_count
    );
    Ok(id)
}
