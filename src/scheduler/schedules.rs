//! Scheduled search execution.
//!
//! `search_schedules` rows describe recurring outbound searches. The job
//! types are a closed set modeled as a tagged variant with one handler per
//! variant; adding a type means extending the enum. After every execution
//! the schedule is restamped: `last_run`, `last_run_status`, and
//! `next_run = now + frequency_days`. Failures additionally create a
//! `schedule_failure` notification.

use chrono::{Duration, Utc};
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;

use super::SchedulerContext;
use crate::alerts;
use crate::notifications;
use crate::outbound::ActorClient;
use crate::position_search;
use crate::week::current_week_key;

/// The closed set of schedule types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    BusinessUnit,
    Keyword,
    BuyerPersona,
    SmallBusiness,
    MedicalSociety,
    PharmaPipeline,
}

impl ScheduleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BusinessUnit => "business_unit",
            Self::Keyword => "keyword",
            Self::BuyerPersona => "buyer_persona",
            Self::SmallBusiness => "small_business",
            Self::MedicalSociety => "medical_society",
            Self::PharmaPipeline => "pharma_pipeline",
        }
    }
}

impl FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "business_unit" => Ok(Self::BusinessUnit),
            "keyword" => Ok(Self::Keyword),
            "buyer_persona" => Ok(Self::BuyerPersona),
            "small_business" => Ok(Self::SmallBusiness),
            "medical_society" => Ok(Self::MedicalSociety),
            "pharma_pipeline" => Ok(Self::PharmaPipeline),
            other => Err(format!("unknown schedule type: {other}")),
        }
    }
}

/// Frequency name to day count. Unknown names fall back to monthly.
pub fn frequency_days(frequency: &str) -> i64 {
    match frequency {
        "daily" => 1,
        "weekly" => 7,
        "biweekly" => 15,
        "monthly" => 30,
        "bimonthly" => 60,
        "quarterly" => 90,
        "semiannual" => 180,
        "annual" => 365,
        _ => 30,
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DueSchedule {
    id: String,
    schedule_type: String,
    entity_name: String,
    frequency: String,
    params: Json<Value>,
}

/// Execute every due schedule. Handler failures are contained per row.
pub async fn process_due(ctx: &SchedulerContext) -> Result<(), sqlx::Error> {
    let due: Vec<DueSchedule> = sqlx::query_as(
        "SELECT id, schedule_type, entity_name, frequency, params
         FROM search_schedules
         WHERE active = TRUE AND next_run <= NOW()
         ORDER BY next_run
         LIMIT 100",
    )
    .fetch_all(&ctx.pool)
    .await?;

    if due.is_empty() {
        return Ok(());
    }
    log::info!("{} due schedules", due.len());

    for schedule in due {
        sqlx::query("UPDATE search_schedules SET last_run_status = 'running' WHERE id = $1")
            .bind(&schedule.id)
            .execute(&ctx.pool)
            .await?;

        let result = match ScheduleType::from_str(&schedule.schedule_type) {
            Ok(kind) => execute(ctx, kind, &schedule.params.0).await,
            Err(e) => Err(e),
        };

        let (status, error) = match &result {
            Ok(()) => ("completed", None),
            Err(e) => ("failed", Some(e.clone())),
        };

        let next_run = Utc::now() + Duration::days(frequency_days(&schedule.frequency));
        sqlx::query(
            "UPDATE search_schedules
             SET last_run = NOW(), last_run_status = $1, last_run_error = $2,
                 next_run = $3, updated_at = NOW()
             WHERE id = $4",
        )
        .bind(status)
        .bind(&error)
        .bind(next_run)
        .bind(&schedule.id)
        .execute(&ctx.pool)
        .await?;

        if let Some(error) = error {
            log::error!("schedule {} ({}) failed: {}", schedule.id, schedule.entity_name, error);
            notifications::schedule_failure(
                &ctx.pool,
                Some(&schedule.id),
                &schedule.schedule_type,
                &schedule.entity_name,
                Some(&error),
            )
            .await?;
        } else {
            log::info!(
                "schedule {} ({}) completed, next run {}",
                schedule.id,
                schedule.entity_name,
                next_run.date_naive()
            );
        }
    }

    Ok(())
}

async fn execute(ctx: &SchedulerContext, kind: ScheduleType, params: &Value) -> Result<(), String> {
    match kind {
        ScheduleType::BusinessUnit => {
            let company = require_param(params, "company")?;
            let area = require_param(params, "therapeutic_area")?;
            dispatch_scrape(
                ctx,
                kind,
                "curious_coder~linkedin-search",
                &json!({"searchTerms": [format!("{company} {area}")], "maxResults": 50}),
            )
            .await
        }
        ScheduleType::Keyword => {
            let keyword = require_param(params, "keyword")?;
            dispatch_scrape(
                ctx,
                kind,
                "curious_coder~linkedin-post-search",
                &json!({"searchTerms": [keyword], "maxResults": 50}),
            )
            .await
        }
        ScheduleType::BuyerPersona => {
            let persona_id = require_param(params, "persona_code")?;
            let persona_name = params
                .get("persona_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&persona_id)
                .to_string();
            position_search::run_search(
                &ctx.pool,
                ctx.collaborators.actor.as_ref(),
                &persona_id,
                &persona_name,
            )
            .await
            .map(|outcome| log::info!("buyer persona search: {:?}", outcome))
            .map_err(|e| e.to_string())
        }
        ScheduleType::SmallBusiness => {
            let business_type = require_param(params, "business_type")?;
            let city = require_param(params, "city")?;
            dispatch_scrape(
                ctx,
                kind,
                "compass~crawler-google-places",
                &json!({"searchStrings": [format!("{business_type} in {city}")], "maxResults": 50}),
            )
            .await
        }
        ScheduleType::MedicalSociety => {
            dispatch_scrape(ctx, kind, "apify~website-content-crawler", &json!({"maxDepth": 1}))
                .await
        }
        ScheduleType::PharmaPipeline => {
            dispatch_scrape(ctx, kind, "apify~website-content-crawler", &json!({"maxDepth": 2}))
                .await
        }
    }
}

fn require_param(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("missing param '{key}'"))
}

/// Run an actor for a non-persona subsystem. Rate limits emit one
/// week-scoped alert (deduplicated) and block the rest of the week.
async fn dispatch_scrape(
    ctx: &SchedulerContext,
    kind: ScheduleType,
    actor_id: &str,
    input: &Value,
) -> Result<(), String> {
    let week = current_week_key();
    let store_err = |e: sqlx::Error| e.to_string();

    if alerts::has_open(&ctx.pool, alerts::KIND_RATE_LIMIT, &week, Some(kind.as_str()))
        .await
        .map_err(store_err)?
    {
        log::info!("{} blocked by rate-limit alert this week", kind.as_str());
        return Ok(());
    }

    match ctx.collaborators.actor.run_actor(actor_id, input).await {
        Ok(items) => {
            log::info!("{}: actor returned {} items", kind.as_str(), items.len());
            Ok(())
        }
        Err(e) if e.is_rate_limit() => {
            alerts::emit(
                &ctx.pool,
                alerts::KIND_RATE_LIMIT,
                &week,
                Some(kind.as_str()),
                &format!("{} rate limited: {}", kind.as_str(), e),
            )
            .await
            .map_err(store_err)?;
            Err(format!("rate limited: {e}"))
        }
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_mapping() {
        assert_eq!(frequency_days("daily"), 1);
        assert_eq!(frequency_days("biweekly"), 15);
        assert_eq!(frequency_days("annual"), 365);
        assert_eq!(frequency_days("whenever"), 30);
    }

    #[test]
    fn schedule_type_round_trips() {
        for kind in [
            ScheduleType::BusinessUnit,
            ScheduleType::Keyword,
            ScheduleType::BuyerPersona,
            ScheduleType::SmallBusiness,
            ScheduleType::MedicalSociety,
            ScheduleType::PharmaPipeline,
        ] {
            assert_eq!(ScheduleType::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(ScheduleType::from_str("mystery").is_err());
    }
}
