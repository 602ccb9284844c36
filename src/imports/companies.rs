//! Bulk company resolution for the import pre-pass.
//!
//! Given every distinct raw company name in a file, resolve them to company
//! rows in two round-trips: one `= ANY` lookup, one insert-if-absent batch
//! for the misses. The unique index on `normalized_name` makes the insert
//! race-safe when two profiles import the same new company concurrently.

use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::HashMap;

use crate::imports::normalize::normalize_company_name;
use crate::store::new_id;

/// Minimal company view carried through the import pipeline.
#[derive(Debug, Clone)]
pub struct ResolvedCompany {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
}

/// Resolve raw names to companies, creating the missing ones.
///
/// Returns a map keyed by normalized name. Unresolvable inputs (empty after
/// normalization) are silently dropped.
pub async fn resolve_bulk(
    pool: &PgPool,
    raw_names: &[String],
) -> Result<HashMap<String, ResolvedCompany>, sqlx::Error> {
    // Normalized name -> first raw spelling seen, preserved as display name.
    let mut wanted: HashMap<String, String> = HashMap::new();
    for raw in raw_names {
        if let Some(normalized) = normalize_company_name(raw) {
            wanted.entry(normalized).or_insert_with(|| raw.trim().to_string());
        }
    }

    if wanted.is_empty() {
        return Ok(HashMap::new());
    }

    let keys: Vec<String> = wanted.keys().cloned().collect();
    let existing: Vec<(String, String, String)> = sqlx::query_as(
        "SELECT id, name, normalized_name FROM companies WHERE normalized_name = ANY($1)",
    )
    .bind(&keys)
    .fetch_all(pool)
    .await?;

    let mut resolved: HashMap<String, ResolvedCompany> = existing
        .into_iter()
        .map(|(id, name, normalized_name)| {
            (
                normalized_name.clone(),
                ResolvedCompany {
                    id,
                    name,
                    normalized_name,
                },
            )
        })
        .collect();

    let missing: Vec<(&String, &String)> = wanted
        .iter()
        .filter(|(normalized, _)| !resolved.contains_key(*normalized))
        .collect();

    if !missing.is_empty() {
        let mut ids = Vec::with_capacity(missing.len());
        let mut names = Vec::with_capacity(missing.len());
        let mut normalized_names = Vec::with_capacity(missing.len());
        for (normalized, raw) in &missing {
            ids.push(new_id());
            names.push((*raw).clone());
            normalized_names.push((*normalized).clone());
        }

        // DO NOTHING instead of DO UPDATE: a concurrent import may have won
        // the race; the refetch below picks up whichever row exists.
        sqlx::query(
            "INSERT INTO companies
                 (id, name, normalized_name, classification, is_active, source)
             SELECT t.id, t.name, t.normalized_name, 'outbound', TRUE, 'linkedin_import'
             FROM UNNEST($1::text[], $2::text[], $3::text[]) AS t(id, name, normalized_name)
             ON CONFLICT (normalized_name) DO NOTHING",
        )
        .bind(&ids)
        .bind(&names)
        .bind(&normalized_names)
        .execute(pool)
        .await?;

        let created: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT id, name, normalized_name FROM companies WHERE normalized_name = ANY($1)",
        )
        .bind(&normalized_names)
        .fetch_all(pool)
        .await?;

        log::info!("company resolution: created {} of {} missing", created.len(), missing.len());

        for (id, name, normalized_name) in created {
            resolved.insert(
                normalized_name.clone(),
                ResolvedCompany {
                    id,
                    name,
                    normalized_name,
                },
            );
        }
    }

    Ok(resolved)
}
