//! Keyword dictionary mutations with priority-aware conflict resolution.
//!
//! A keyword string is owned by exactly one persona. Inserting a keyword
//! that already exists replaces ownership only when the new persona's
//! priority number is strictly lower; otherwise the insert is rejected.
//! Every successful mutation bumps the classifier cache generation.

use chrono::Utc;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::{PersonaClassifier, UNRANKED_PRIORITY, normalize_job_title};
use crate::store::bulk;
use crate::store::new_id;

#[derive(Debug, Error)]
pub enum KeywordError {
    #[error("keyword '{keyword}' already owned by higher or equal priority persona '{owner}'")]
    OwnedByHigherPriority { keyword: String, owner: String },
    #[error("keyword is empty after normalization")]
    Empty,
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

/// What a single insert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InsertAction {
    Created,
    Replaced,
}

/// Tally of a bulk insert.
#[derive(Debug, Default, Clone, Serialize, JsonSchema)]
pub struct BulkInsertOutcome {
    pub created: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub total_input: usize,
}

/// A dictionary row as returned by listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct KeywordRow {
    pub id: String,
    pub keyword: String,
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
}

async fn priority_map(pool: &PgPool) -> Result<HashMap<String, i32>, sqlx::Error> {
    let rows: Vec<(String, i32)> =
        sqlx::query_as("SELECT buyer_persona_id, priority FROM buyer_persona_priorities")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

fn priority_of(map: &HashMap<String, i32>, persona_id: &str) -> i32 {
    map.get(persona_id).copied().unwrap_or(UNRANKED_PRIORITY)
}

/// Insert one keyword, applying the ownership rule.
pub async fn insert_keyword(
    classifier: &PersonaClassifier,
    pool: &PgPool,
    raw_keyword: &str,
    buyer_persona_id: &str,
    buyer_persona_name: &str,
) -> Result<InsertAction, KeywordError> {
    let keyword = normalize_job_title(raw_keyword);
    if keyword.is_empty() {
        return Err(KeywordError::Empty);
    }

    let priorities = priority_map(pool).await?;
    let action = insert_one(
        pool,
        &priorities,
        &keyword,
        buyer_persona_id,
        buyer_persona_name,
    )
    .await?;

    classifier.invalidate_cache();
    Ok(action)
}

/// Insert many keywords parsed from comma/newline separated text.
///
/// Per-keyword the same ownership rule applies; already-owned keywords with
/// higher-priority owners are counted as skipped, not errors.
pub async fn insert_keywords_bulk(
    classifier: &PersonaClassifier,
    pool: &PgPool,
    raw_text: &str,
    buyer_persona_id: &str,
    buyer_persona_name: &str,
) -> Result<BulkInsertOutcome, KeywordError> {
    let keywords: Vec<String> = raw_text
        .replace('\n', ",")
        .replace(';', ",")
        .split(',')
        .map(normalize_job_title)
        .filter(|k| !k.is_empty())
        .collect();

    if keywords.is_empty() {
        return Err(KeywordError::Empty);
    }

    let priorities = priority_map(pool).await?;
    let mut outcome = BulkInsertOutcome {
        total_input: keywords.len(),
        ..Default::default()
    };

    for keyword in &keywords {
        match insert_one(pool, &priorities, keyword, buyer_persona_id, buyer_persona_name).await {
            Ok(InsertAction::Created) => outcome.created += 1,
            Ok(InsertAction::Replaced) => outcome.replaced += 1,
            Err(KeywordError::OwnedByHigherPriority { .. }) => outcome.skipped += 1,
            Err(e) => return Err(e),
        }
    }

    if outcome.created > 0 || outcome.replaced > 0 {
        classifier.invalidate_cache();
    }

    Ok(outcome)
}

async fn insert_one(
    pool: &PgPool,
    priorities: &HashMap<String, i32>,
    keyword: &str,
    buyer_persona_id: &str,
    buyer_persona_name: &str,
) -> Result<InsertAction, KeywordError> {
    let existing: Option<(String, String)> = sqlx::query_as(
        "SELECT buyer_persona_id, buyer_persona_name FROM job_keywords WHERE keyword = $1",
    )
    .bind(keyword)
    .fetch_optional(pool)
    .await?;

    if let Some((owner_id, owner_name)) = existing {
        let new_priority = priority_of(priorities, buyer_persona_id);
        let owner_priority = priority_of(priorities, &owner_id);

        if new_priority < owner_priority {
            sqlx::query(
                "UPDATE job_keywords
                 SET buyer_persona_id = $1, buyer_persona_name = $2, updated_at = NOW()
                 WHERE keyword = $3",
            )
            .bind(buyer_persona_id)
            .bind(buyer_persona_name)
            .bind(keyword)
            .execute(pool)
            .await?;
            return Ok(InsertAction::Replaced);
        }

        return Err(KeywordError::OwnedByHigherPriority {
            keyword: keyword.to_string(),
            owner: owner_name,
        });
    }

    sqlx::query(
        "INSERT INTO job_keywords (id, keyword, buyer_persona_id, buyer_persona_name)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(new_id())
    .bind(keyword)
    .bind(buyer_persona_id)
    .bind(buyer_persona_name)
    .execute(pool)
    .await?;

    Ok(InsertAction::Created)
}

/// List keywords, optionally filtered by owning persona.
pub async fn list_keywords(
    pool: &PgPool,
    buyer_persona_id: Option<&str>,
) -> Result<Vec<KeywordRow>, sqlx::Error> {
    match buyer_persona_id {
        Some(persona) => {
            sqlx::query_as(
                "SELECT id, keyword, buyer_persona_id, buyer_persona_name, created_at, updated_at
                 FROM job_keywords WHERE buyer_persona_id = $1 ORDER BY keyword",
            )
            .bind(persona)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as(
                "SELECT id, keyword, buyer_persona_id, buyer_persona_name, created_at, updated_at
                 FROM job_keywords ORDER BY keyword",
            )
            .fetch_all(pool)
            .await
        }
    }
}

/// Delete one keyword by id. Returns whether a row was removed.
pub async fn delete_keyword(
    classifier: &PersonaClassifier,
    pool: &PgPool,
    keyword_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM job_keywords WHERE id = $1")
        .bind(keyword_id)
        .execute(pool)
        .await?;

    let removed = result.rows_affected() > 0;
    if removed {
        classifier.invalidate_cache();
    }
    Ok(removed)
}

/// Replace the whole priority table (ascending = higher priority first).
///
/// An ordered bulk write: a partially replaced priority table would corrupt
/// keyword ownership decisions, so the delete and inserts are one
/// transaction that aborts on the first error.
pub async fn set_priorities(
    classifier: &PersonaClassifier,
    pool: &PgPool,
    entries: &[(String, String, i32)],
) -> Result<(), sqlx::Error> {
    let mut ops: Vec<bulk::BulkOp> = Vec::with_capacity(entries.len() + 1);
    ops.push(bulk::op(|conn| {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM buyer_persona_priorities")
                .execute(&mut *conn)
                .await?;
            Ok(result.rows_affected())
        })
    }));

    for (persona_id, persona_name, priority) in entries.iter().cloned() {
        ops.push(bulk::op(move |conn| {
            Box::pin(async move {
                let result = sqlx::query(
                    "INSERT INTO buyer_persona_priorities
                         (buyer_persona_id, buyer_persona_name, priority)
                     VALUES ($1, $2, $3)",
                )
                .bind(persona_id)
                .bind(persona_name)
                .bind(priority)
                .execute(&mut *conn)
                .await?;
                Ok(result.rows_affected())
            })
        }));
    }

    bulk::ordered(pool, ops).await?;
    classifier.invalidate_cache();
    Ok(())
}

/// List the priority table ascending.
pub async fn list_priorities(pool: &PgPool) -> Result<Vec<(String, String, i32)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT buyer_persona_id, buyer_persona_name, priority
         FROM buyer_persona_priorities ORDER BY priority",
    )
    .fetch_all(pool)
    .await
}
