//! Keyword dictionary and classification endpoints.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthenticatedUser;
use crate::classifier::keywords::{
    self, BulkInsertOutcome, InsertAction, KeywordError, KeywordRow,
};
use crate::classifier::{Classification, PersonaClassifier, reclassification};
use crate::error::ApiError;
use crate::models::{ApiResponse, MessageResponse, ResponseMeta};

impl From<KeywordError> for ApiError {
    fn from(err: KeywordError) -> Self {
        match err {
            KeywordError::OwnedByHigherPriority { .. } => ApiError::Conflict(err.to_string()),
            KeywordError::Empty => ApiError::BadRequest(err.to_string()),
            KeywordError::Store(e) => e.into(),
        }
    }
}

#[openapi(tag = "Job Keywords")]
#[get("/job-keywords?<buyer_persona_id>")]
pub async fn list_keywords(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    buyer_persona_id: Option<String>,
) -> Result<Json<ApiResponse<Vec<KeywordRow>>>, ApiError> {
    let rows = keywords::list_keywords(pool.inner(), buyer_persona_id.as_deref()).await?;
    let total = rows.len() as i64;
    Ok(Json(ApiResponse::with_meta(rows, ResponseMeta { total })))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateKeywordRequest {
    pub keyword: String,
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CreateKeywordResponse {
    pub action: InsertAction,
}

#[openapi(tag = "Job Keywords")]
#[post("/job-keywords", data = "<request>")]
pub async fn create_keyword(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    classifier: &State<PersonaClassifier>,
    request: Json<CreateKeywordRequest>,
) -> Result<Json<ApiResponse<CreateKeywordResponse>>, ApiError> {
    let action = keywords::insert_keyword(
        classifier,
        pool.inner(),
        &request.keyword,
        &request.buyer_persona_id,
        &request.buyer_persona_name,
    )
    .await?;
    Ok(Json(ApiResponse::new(CreateKeywordResponse { action })))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BulkKeywordRequest {
    /// Comma, semicolon, or newline separated keywords.
    pub keywords: String,
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
}

#[openapi(tag = "Job Keywords")]
#[post("/job-keywords/bulk", data = "<request>")]
pub async fn create_keywords_bulk(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    classifier: &State<PersonaClassifier>,
    request: Json<BulkKeywordRequest>,
) -> Result<Json<ApiResponse<BulkInsertOutcome>>, ApiError> {
    let outcome = keywords::insert_keywords_bulk(
        classifier,
        pool.inner(),
        &request.keywords,
        &request.buyer_persona_id,
        &request.buyer_persona_name,
    )
    .await?;
    Ok(Json(ApiResponse::new(outcome)))
}

#[openapi(tag = "Job Keywords")]
#[delete("/job-keywords/<keyword_id>")]
pub async fn delete_keyword(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    classifier: &State<PersonaClassifier>,
    keyword_id: &str,
) -> Result<Json<MessageResponse>, ApiError> {
    if !keywords::delete_keyword(classifier, pool.inner(), keyword_id).await? {
        return Err(ApiError::NotFound(format!("keyword '{keyword_id}' not found")));
    }
    Ok(Json(MessageResponse::ok("keyword deleted")))
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PriorityEntry {
    pub buyer_persona_id: String,
    pub buyer_persona_name: String,
    pub priority: i32,
}

#[openapi(tag = "Job Keywords")]
#[get("/job-keywords/priorities")]
pub async fn list_priorities(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
) -> Result<Json<ApiResponse<Vec<PriorityEntry>>>, ApiError> {
    let rows = keywords::list_priorities(pool.inner()).await?;
    Ok(Json(ApiResponse::new(
        rows.into_iter()
            .map(|(buyer_persona_id, buyer_persona_name, priority)| PriorityEntry {
                buyer_persona_id,
                buyer_persona_name,
                priority,
            })
            .collect(),
    )))
}

#[openapi(tag = "Job Keywords")]
#[put("/job-keywords/priorities", data = "<request>")]
pub async fn set_priorities(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    classifier: &State<PersonaClassifier>,
    request: Json<Vec<PriorityEntry>>,
) -> Result<Json<MessageResponse>, ApiError> {
    let entries: Vec<(String, String, i32)> = request
        .iter()
        .map(|e| (e.buyer_persona_id.clone(), e.buyer_persona_name.clone(), e.priority))
        .collect();
    keywords::set_priorities(classifier, pool.inner(), &entries).await?;
    Ok(Json(MessageResponse::ok("priorities replaced")))
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ClassifyRequest {
    pub job_title: String,
}

/// Diagnostic classification: the winning persona plus every match.
#[openapi(tag = "Job Keywords")]
#[post("/job-keywords/classify", data = "<request>")]
pub async fn classify(
    _user: AuthenticatedUser,
    classifier: &State<PersonaClassifier>,
    request: Json<ClassifyRequest>,
) -> Result<Json<ApiResponse<Classification>>, ApiError> {
    let classification = classifier
        .classify(&request.job_title)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(ApiResponse::new(classification)))
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct ReclassifyRequest {
    /// Restrict the sweep to contacts currently holding this persona.
    #[serde(default)]
    pub buyer_persona: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ReclassifyResponse {
    pub job_id: String,
}

/// Enqueue a reclassification job; the 30 s drain picks it up.
#[openapi(tag = "Job Keywords")]
#[post("/job-keywords/reclassify", data = "<request>")]
pub async fn reclassify(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    request: Json<ReclassifyRequest>,
) -> Result<Json<ApiResponse<ReclassifyResponse>>, ApiError> {
    let filter = match &request.buyer_persona {
        Some(persona) => json!({"buyer_persona": persona}),
        None => json!({}),
    };
    let job_id = reclassification::enqueue(pool.inner(), filter).await?;
    Ok(Json(ApiResponse::new(ReclassifyResponse { job_id })))
}
