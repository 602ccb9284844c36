//! Weekly-quota position search driver.
//!
//! Three finders (one per buyer persona) each chase a weekly goal of 50
//! contacts sourced from LinkedIn position searches, 150 across the
//! section. Keywords rotate strictly: the least-recently-used keyword runs
//! next, so no keyword repeats before a full cycle completes.
//!
//! A 429 or quota-style answer from the actor raises a `rate_limit` alert
//! keyed by `(week, persona)`; further runs for that persona are blocked
//! for the rest of the ISO week and the traffic-light section shows red
//! until an operator resolves the alert.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::alerts;
use crate::config::WEEKLY_GOAL_PER_FINDER;
use crate::imports::companies;
use crate::imports::normalize::{normalize_email, normalize_linkedin_url};
use crate::outbound::{ActorClient, OutboundError};
use crate::store::new_id;
use crate::week::{current_week_key, current_week_start};

/// Actor used for LinkedIn position searches.
pub const SEARCH_ACTOR_ID: &str = "curious_coder~linkedin-search";

pub const SOURCE_POSITION_SEARCH: &str = "position_search";

#[derive(Debug, Error)]
pub enum PositionSearchError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("outbound error: {0}")]
    Outbound(#[from] OutboundError),
}

/// One rotation keyword for a finder.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct PositionKeyword {
    pub id: String,
    pub buyer_persona_id: String,
    pub keyword: String,
    pub active: bool,
    pub last_used: Option<DateTime<Utc>>,
    pub use_count: i32,
    pub contacts_found: i32,
}

/// What a search run did.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SearchRunOutcome {
    /// Contacts inserted this run.
    Inserted { keyword: String, count: usize },
    /// An unresolved rate-limit alert blocks this persona for the week.
    BlockedByAlert,
    /// The weekly goal is already met.
    GoalReached,
    /// No active keywords configured for the persona.
    NoKeywords,
    /// The upstream throttled us; an alert was emitted.
    RateLimited,
}

/// Least-recently-used active keyword; never-used keywords go first.
pub async fn next_keyword(
    pool: &PgPool,
    buyer_persona_id: &str,
) -> Result<Option<PositionKeyword>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, buyer_persona_id, keyword, active, last_used, use_count, contacts_found
         FROM position_keywords
         WHERE buyer_persona_id = $1 AND active = TRUE
         ORDER BY last_used ASC NULLS FIRST, created_at
         LIMIT 1",
    )
    .bind(buyer_persona_id)
    .fetch_optional(pool)
    .await
}

async fn mark_keyword_used(
    pool: &PgPool,
    keyword_id: &str,
    contacts_found: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE position_keywords
         SET last_used = NOW(), use_count = use_count + 1, contacts_found = contacts_found + $1
         WHERE id = $2",
    )
    .bind(contacts_found)
    .bind(keyword_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Contacts this persona's finder created so far this week.
pub async fn weekly_count(pool: &PgPool, buyer_persona_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM contacts
         WHERE source = $1 AND buyer_persona = $2 AND created_at >= $3",
    )
    .bind(SOURCE_POSITION_SEARCH)
    .bind(buyer_persona_id)
    .bind(current_week_start().and_time(chrono::NaiveTime::MIN).and_utc())
    .fetch_one(pool)
    .await
}

/// Total position-search contacts created this week, across finders.
pub async fn weekly_total(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM contacts WHERE source = $1 AND created_at >= $2",
    )
    .bind(SOURCE_POSITION_SEARCH)
    .bind(current_week_start().and_time(chrono::NaiveTime::MIN).and_utc())
    .fetch_one(pool)
    .await
}

/// Run one search cycle for a persona's finder.
pub async fn run_search(
    pool: &PgPool,
    actor: &dyn ActorClient,
    buyer_persona_id: &str,
    buyer_persona_name: &str,
) -> Result<SearchRunOutcome, PositionSearchError> {
    let week = current_week_key();

    if alerts::has_open(pool, alerts::KIND_RATE_LIMIT, &week, Some(buyer_persona_id)).await? {
        log::info!("position search blocked for {} this week", buyer_persona_id);
        return Ok(SearchRunOutcome::BlockedByAlert);
    }

    let found = weekly_count(pool, buyer_persona_id).await?;
    let remaining = WEEKLY_GOAL_PER_FINDER - found;
    if remaining <= 0 {
        return Ok(SearchRunOutcome::GoalReached);
    }

    let Some(keyword) = next_keyword(pool, buyer_persona_id).await? else {
        log::warn!("no active position keywords for {}", buyer_persona_id);
        return Ok(SearchRunOutcome::NoKeywords);
    };

    log::info!(
        "position search for {} with keyword '{}' ({} remaining this week)",
        buyer_persona_id,
        keyword.keyword,
        remaining
    );

    let input = json!({
        "searchTerms": [keyword.keyword],
        "maxResults": remaining,
    });

    let items = match actor.run_actor(SEARCH_ACTOR_ID, &input).await {
        Ok(items) => items,
        Err(e) if e.is_rate_limit() => {
            log::warn!("position search rate limited for {}: {}", buyer_persona_id, e);
            alerts::emit(
                pool,
                alerts::KIND_RATE_LIMIT,
                &week,
                Some(buyer_persona_id),
                &format!("position search rate limited: {}", e),
            )
            .await?;
            return Ok(SearchRunOutcome::RateLimited);
        }
        Err(e) => return Err(e.into()),
    };

    let inserted = insert_new_contacts(
        pool,
        &items,
        buyer_persona_id,
        buyer_persona_name,
        remaining as usize,
    )
    .await?;

    mark_keyword_used(pool, &keyword.id, inserted as i32).await?;

    log::info!(
        "position search for {}: {} of {} items inserted",
        buyer_persona_id,
        inserted,
        items.len()
    );

    Ok(SearchRunOutcome::Inserted {
        keyword: keyword.keyword,
        count: inserted,
    })
}

/// Insert actor results that match no existing contact, up to `cap`.
/// Deduplication keys are the normalized LinkedIn URL and the email.
async fn insert_new_contacts(
    pool: &PgPool,
    items: &[Value],
    buyer_persona_id: &str,
    buyer_persona_name: &str,
    cap: usize,
) -> Result<usize, sqlx::Error> {
    let company_names: Vec<String> = items
        .iter()
        .filter_map(|item| item["company"].as_str().map(|s| s.to_string()))
        .collect();
    let resolved_companies = companies::resolve_bulk(pool, &company_names).await?;

    let mut inserted = 0usize;
    for item in items {
        if inserted >= cap {
            break;
        }

        let name = item["name"].as_str().unwrap_or_default().trim().to_string();
        let url = item["linkedin_url"]
            .as_str()
            .or_else(|| item["url"].as_str())
            .and_then(normalize_linkedin_url);
        let email = item["email"].as_str().and_then(normalize_email);
        let job_title = item["position"]
            .as_str()
            .or_else(|| item["title"].as_str())
            .map(|s| s.to_string());

        if name.is_empty() && url.is_none() {
            continue;
        }

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM contacts
             WHERE ($1::text IS NOT NULL AND linkedin_url_normalized = $1)
                OR ($2::text IS NOT NULL AND email = $2)",
        )
        .bind(&url)
        .bind(&email)
        .fetch_one(pool)
        .await?;
        if exists > 0 {
            continue;
        }

        let company = item["company"]
            .as_str()
            .and_then(crate::imports::normalize::normalize_company_name)
            .and_then(|normalized| resolved_companies.get(&normalized));

        let emails = match &email {
            Some(email) => json!([{"email": email, "is_primary": true}]),
            None => json!([]),
        };
        let companies_json = match company {
            Some(c) => json!([{"company_id": c.id, "company_name": c.name, "is_primary": true}]),
            None => json!([]),
        };

        sqlx::query(
            "INSERT INTO contacts
                 (id, name, email, emails, linkedin_url, linkedin_url_normalized,
                  job_title, company, company_id, companies, stage,
                  buyer_persona, buyer_persona_name, source, source_details)
             VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8, $9, 1, $10, $11, $12, $13)",
        )
        .bind(new_id())
        .bind(if name.is_empty() { None } else { Some(name.clone()) })
        .bind(&email)
        .bind(emails)
        .bind(&url)
        .bind(&job_title)
        .bind(company.map(|c| c.name.clone()))
        .bind(company.map(|c| c.id.clone()))
        .bind(companies_json)
        .bind(buyer_persona_id)
        .bind(buyer_persona_name)
        .bind(SOURCE_POSITION_SEARCH)
        .bind(buyer_persona_id)
        .execute(pool)
        .await?;

        inserted += 1;
    }

    Ok(inserted)
}

/// Sync rotation keywords from the classifier dictionary for one persona:
/// dictionary keywords not yet in rotation are added as active.
pub async fn sync_keywords_from_dictionary(
    pool: &PgPool,
    buyer_persona_id: &str,
) -> Result<usize, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO position_keywords (id, buyer_persona_id, keyword)
         SELECT gen_random_uuid()::text, jk.buyer_persona_id, jk.keyword
         FROM job_keywords jk
         WHERE jk.buyer_persona_id = $1
         ON CONFLICT (buyer_persona_id, keyword) DO NOTHING",
    )
    .bind(buyer_persona_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() as usize)
}
