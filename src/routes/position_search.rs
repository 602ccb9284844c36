//! Position-search driver endpoints.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;
use crate::classifier::keywords::list_priorities;
use crate::config::{WEEKLY_GOAL_PER_FINDER, WEEKLY_GOAL_TOTAL};
use crate::error::ApiError;
use crate::models::ApiResponse;
use crate::outbound::Collaborators;
use crate::position_search::{self, PositionSearchError, SearchRunOutcome};

impl From<PositionSearchError> for ApiError {
    fn from(err: PositionSearchError) -> Self {
        match err {
            PositionSearchError::Store(e) => e.into(),
            PositionSearchError::Outbound(e) => ApiError::InternalError(e.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSearchRequest {
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
}

#[openapi(tag = "Position Search")]
#[post("/position-search/run", data = "<request>")]
pub async fn run_search(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    collaborators: &State<Collaborators>,
    request: Json<RunSearchRequest>,
) -> Result<Json<ApiResponse<SearchRunOutcome>>, ApiError> {
    let outcome = position_search::run_search(
        pool.inner(),
        collaborators.actor.as_ref(),
        &request.buyer_persona_id,
        &request.buyer_persona_name,
    )
    .await?;
    Ok(Json(ApiResponse::new(outcome)))
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct FinderStatus {
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
    pub weekly_count: i64,
    pub weekly_goal: i64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PositionSearchStatus {
    pub finders: Vec<FinderStatus>,
    pub weekly_total: i64,
    pub weekly_goal_total: i64,
}

#[openapi(tag = "Position Search")]
#[get("/position-search/status")]
pub async fn status(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
) -> Result<Json<ApiResponse<PositionSearchStatus>>, ApiError> {
    let personas = list_priorities(pool.inner()).await?;
    let mut finders = Vec::new();
    for (buyer_persona_id, buyer_persona_name, _) in personas.into_iter().take(3) {
        let weekly_count = position_search::weekly_count(pool.inner(), &buyer_persona_id).await?;
        finders.push(FinderStatus {
            buyer_persona_id,
            buyer_persona_name,
            weekly_count,
            weekly_goal: WEEKLY_GOAL_PER_FINDER,
        });
    }

    Ok(Json(ApiResponse::new(PositionSearchStatus {
        finders,
        weekly_total: position_search::weekly_total(pool.inner()).await?,
        weekly_goal_total: WEEKLY_GOAL_TOTAL,
    })))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SyncKeywordsRequest {
    pub buyer_persona_id: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct SyncKeywordsResponse {
    pub added: usize,
}

/// Copy dictionary keywords into the rotation for a persona.
#[openapi(tag = "Position Search")]
#[post("/position-search/sync-keywords", data = "<request>")]
pub async fn sync_keywords(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    request: Json<SyncKeywordsRequest>,
) -> Result<Json<ApiResponse<SyncKeywordsResponse>>, ApiError> {
    let added =
        position_search::sync_keywords_from_dictionary(pool.inner(), &request.buyer_persona_id)
            .await?;
    Ok(Json(ApiResponse::new(SyncKeywordsResponse { added })))
}
