//! Traffic-light status endpoint.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;
use std::collections::HashMap;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::semaphore::{self, NodeStatus};

/// Flat `node_id -> {status, metadata}` map for the whole tree.
#[openapi(tag = "Semaphore")]
#[get("/semaphore")]
pub async fn semaphore_status(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
) -> Result<Json<ApiResponse<HashMap<String, NodeStatus>>>, ApiError> {
    let nodes = semaphore::compute(pool.inner()).await?;
    Ok(Json(ApiResponse::new(nodes)))
}
