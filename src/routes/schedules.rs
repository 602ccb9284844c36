//! Search schedule management.

use chrono::{DateTime, Duration, Utc};
use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::types::Json as SqlJson;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, MessageResponse};
use crate::scheduler::schedules::{ScheduleType, frequency_days};
use crate::store::new_id;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct ScheduleRow {
    pub id: String,
    pub schedule_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub frequency: String,
    pub frequency_days: i32,
    #[schemars(with = "Value")]
    pub params: SqlJson<Value>,
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_error: Option<String>,
    pub next_run: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SCHEDULE_COLUMNS: &str = "id, schedule_type, entity_id, entity_name, frequency, \
    frequency_days, params, active, last_run, last_run_status, last_run_error, next_run, \
    created_at, updated_at";

#[openapi(tag = "Scheduler")]
#[get("/scheduler/schedules")]
pub async fn list_schedules(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
) -> Result<Json<ApiResponse<Vec<ScheduleRow>>>, ApiError> {
    let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM search_schedules ORDER BY created_at DESC"
    ))
    .fetch_all(pool.inner())
    .await?;
    Ok(Json(ApiResponse::new(rows)))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateScheduleRequest {
    pub schedule_type: String,
    pub entity_id: String,
    pub entity_name: String,
    pub frequency: String,
    #[serde(default)]
    pub params: Value,
}

#[openapi(tag = "Scheduler")]
#[post("/scheduler/schedules", data = "<request>")]
pub async fn create_schedule(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    request: Json<CreateScheduleRequest>,
) -> Result<Json<ApiResponse<ScheduleRow>>, ApiError> {
    ScheduleType::from_str(&request.schedule_type).map_err(ApiError::BadRequest)?;

    let days = frequency_days(&request.frequency);
    let next_run = Utc::now() + Duration::days(days);
    let id = new_id();

    let row: ScheduleRow = sqlx::query_as(&format!(
        "INSERT INTO search_schedules
             (id, schedule_type, entity_id, entity_name, frequency, frequency_days,
              params, next_run)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(&id)
    .bind(&request.schedule_type)
    .bind(&request.entity_id)
    .bind(&request.entity_name)
    .bind(&request.frequency)
    .bind(days as i32)
    .bind(&request.params)
    .bind(next_run)
    .fetch_one(pool.inner())
    .await?;

    Ok(Json(ApiResponse::new(row)))
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct UpdateScheduleRequest {
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[openapi(tag = "Scheduler")]
#[patch("/scheduler/schedules/<schedule_id>", data = "<request>")]
pub async fn update_schedule(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    schedule_id: &str,
    request: Json<UpdateScheduleRequest>,
) -> Result<Json<ApiResponse<ScheduleRow>>, ApiError> {
    let existing: Option<ScheduleRow> = sqlx::query_as(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM search_schedules WHERE id = $1"
    ))
    .bind(schedule_id)
    .fetch_optional(pool.inner())
    .await?;
    let existing =
        existing.ok_or_else(|| ApiError::NotFound(format!("schedule '{schedule_id}' not found")))?;

    let frequency = request.frequency.clone().unwrap_or(existing.frequency);
    let days = frequency_days(&frequency);
    let active = request.active.unwrap_or(existing.active);
    let params = request.params.clone().unwrap_or(existing.params.0);

    let row: ScheduleRow = sqlx::query_as(&format!(
        "UPDATE search_schedules
         SET frequency = $1, frequency_days = $2, active = $3, params = $4, updated_at = NOW()
         WHERE id = $5
         RETURNING {SCHEDULE_COLUMNS}"
    ))
    .bind(&frequency)
    .bind(days as i32)
    .bind(active)
    .bind(&params)
    .bind(schedule_id)
    .fetch_one(pool.inner())
    .await?;

    Ok(Json(ApiResponse::new(row)))
}

#[openapi(tag = "Scheduler")]
#[delete("/scheduler/schedules/<schedule_id>")]
pub async fn delete_schedule(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    schedule_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let result = sqlx::query("DELETE FROM search_schedules WHERE id = $1")
        .bind(schedule_id)
        .execute(pool.inner())
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("schedule '{schedule_id}' not found")));
    }
    Ok(Json(MessageResponse::ok("schedule deleted")))
}

/// Make the schedule due on the next hourly pass.
#[openapi(tag = "Scheduler")]
#[post("/scheduler/schedules/<schedule_id>/run-now")]
pub async fn run_now(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    schedule_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    let result = sqlx::query(
        "UPDATE search_schedules SET next_run = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(schedule_id)
    .execute(pool.inner())
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("schedule '{schedule_id}' not found")));
    }
    Ok(Json(MessageResponse::ok("schedule queued for next pass")))
}
