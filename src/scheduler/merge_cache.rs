//! Daily merge-candidates cache refresh.
//!
//! Pre-computes groups of companies that look like duplicates (shared
//! domain, or identical normalized name once legal suffixes are stripped)
//! so the merge UI and the semaphore read a cached answer instead of
//! scanning companies on every request.

use chrono::{Timelike, Utc};
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::{Value, json};
use std::collections::HashMap;

const CACHE_ROW_ID: &str = "current";
const REFRESH_HOUR_UTC: u32 = 3;

/// Legal suffixes ignored when grouping by name.
const NAME_SUFFIXES: [&str; 8] = ["inc", "llc", "ltd", "sa", "sl", "sas", "corp", "gmbh"];

fn strip_suffixes(normalized_name: &str) -> String {
    let mut tokens: Vec<&str> = normalized_name.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        let bare = last.trim_matches('.');
        if NAME_SUFFIXES.contains(&bare) {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Hourly tick guard: refresh once per day at 03:00 UTC.
pub async fn refresh_if_due(pool: &PgPool) -> Result<(), sqlx::Error> {
    if Utc::now().hour() != REFRESH_HOUR_UTC {
        return Ok(());
    }

    let already: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM merge_candidates_cache
         WHERE id = $1 AND refreshed_at::date = CURRENT_DATE",
    )
    .bind(CACHE_ROW_ID)
    .fetch_one(pool)
    .await?;
    if already > 0 {
        return Ok(());
    }

    refresh(pool).await
}

/// Rebuild the cache row from the full companies table.
pub async fn refresh(pool: &PgPool) -> Result<(), sqlx::Error> {
    let companies: Vec<(String, String, String, Json<Vec<String>>)> =
        sqlx::query_as("SELECT id, name, normalized_name, domains FROM companies")
            .fetch_all(pool)
            .await?;

    let mut by_domain: HashMap<String, Vec<Value>> = HashMap::new();
    let mut by_name: HashMap<String, Vec<Value>> = HashMap::new();

    for (id, name, normalized_name, domains) in &companies {
        let entry = json!({"company_id": id, "name": name});
        for domain in &domains.0 {
            by_domain
                .entry(domain.to_lowercase())
                .or_default()
                .push(entry.clone());
        }
        by_name
            .entry(strip_suffixes(normalized_name))
            .or_default()
            .push(entry);
    }

    let domain_groups: Vec<Value> = by_domain
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(domain, members)| json!({"domain": domain, "companies": members}))
        .collect();
    let name_groups: Vec<Value> = by_name
        .into_iter()
        .filter(|(key, members)| !key.is_empty() && members.len() > 1)
        .map(|(name, members)| json!({"name": name, "companies": members}))
        .collect();

    sqlx::query(
        "INSERT INTO merge_candidates_cache
             (id, domain_groups, name_groups, domain_group_count, name_group_count, refreshed_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (id) DO UPDATE
         SET domain_groups = EXCLUDED.domain_groups,
             name_groups = EXCLUDED.name_groups,
             domain_group_count = EXCLUDED.domain_group_count,
             name_group_count = EXCLUDED.name_group_count,
             refreshed_at = NOW()",
    )
    .bind(CACHE_ROW_ID)
    .bind(Value::Array(domain_groups.clone()))
    .bind(Value::Array(name_groups.clone()))
    .bind(domain_groups.len() as i32)
    .bind(name_groups.len() as i32)
    .execute(pool)
    .await?;

    log::info!(
        "merge candidates cache refreshed: {} domain groups, {} name groups",
        domain_groups.len(),
        name_groups.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_legal_suffixes() {
        assert_eq!(strip_suffixes("acme corp"), "acme");
        assert_eq!(strip_suffixes("acme labs inc."), "acme labs");
        assert_eq!(strip_suffixes("acme"), "acme");
        assert_eq!(strip_suffixes("sa"), "");
    }
}
