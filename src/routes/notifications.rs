//! Notification and alert endpoints.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;

use crate::alerts::{self, Alert};
use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, MessageResponse};
use crate::notifications::{self, Notification};

#[openapi(tag = "Notifications")]
#[get("/notifications?<unread_only>&<limit>")]
pub async fn list_notifications(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    unread_only: Option<bool>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<Vec<Notification>>>, ApiError> {
    let rows = notifications::list(
        pool.inner(),
        unread_only.unwrap_or(false),
        limit.unwrap_or(50).clamp(1, 200),
    )
    .await?;
    Ok(Json(ApiResponse::new(rows)))
}

#[openapi(tag = "Notifications")]
#[patch("/notifications/<notification_id>/read")]
pub async fn mark_notification_read(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    notification_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    if !notifications::mark_read(pool.inner(), notification_id).await? {
        return Err(ApiError::NotFound(format!(
            "notification '{notification_id}' not found"
        )));
    }
    Ok(Json(MessageResponse::ok("notification read")))
}

#[openapi(tag = "Notifications")]
#[get("/alerts?<limit>")]
pub async fn list_alerts(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<Vec<Alert>>>, ApiError> {
    let rows = alerts::list_open(pool.inner(), limit.unwrap_or(50).clamp(1, 200)).await?;
    Ok(Json(ApiResponse::new(rows)))
}

/// Resolving a rate-limit alert unblocks its subsystem for the week.
#[openapi(tag = "Notifications")]
#[patch("/alerts/<alert_id>/resolve")]
pub async fn resolve_alert(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    alert_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    if !alerts::resolve(pool.inner(), alert_id).await? {
        return Err(ApiError::NotFound(format!("alert '{alert_id}' not found")));
    }
    Ok(Json(MessageResponse::ok("alert resolved")))
}
