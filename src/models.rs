//! Data transfer objects shared across modules and routes.
//!
//! Every struct in this module derives `JsonSchema` so `rocket_okapi` can
//! describe the payloads accurately in the generated OpenAPI document.

use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_db_pools::sqlx::types::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One entry in a contact's email list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EmailEntry {
    pub email: String,
    pub is_primary: bool,
}

/// One entry in a contact's company association list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompanyLink {
    pub company_id: String,
    pub company_name: String,
    pub is_primary: bool,
}

/// One webinar a contact has interacted with.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebinarEntry {
    pub event_id: String,
    pub status: String,
    pub registered_at: Option<DateTime<Utc>>,
}

/// The unified contact identity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Contact {
    pub id: String,
    pub email: Option<String>,
    #[schemars(with = "Vec<EmailEntry>")]
    pub emails: Json<Vec<EmailEntry>>,
    pub linkedin_url: Option<String>,
    pub linkedin_url_normalized: Option<String>,
    pub name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub job_title: Option<String>,
    pub job_title_normalized: Option<String>,
    pub company: Option<String>,
    pub company_id: Option<String>,
    #[schemars(with = "Vec<CompanyLink>")]
    pub companies: Json<Vec<CompanyLink>>,
    pub stage: i32,
    pub stage_1_status: Option<String>,
    pub buyer_persona: Option<String>,
    pub buyer_persona_name: Option<String>,
    pub persona_locked: bool,
    #[schemars(with = "Vec<WebinarEntry>")]
    pub webinar_history: Json<Vec<WebinarEntry>>,
    #[schemars(with = "serde_json::Value")]
    pub email_cadence: Json<serde_json::Value>,
    pub source: Option<String>,
    pub source_details: Option<String>,
    pub linkedin_accepted_by: Option<String>,
    pub first_connected_on_linkedin: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A company record; `normalized_name` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    #[schemars(with = "Vec<String>")]
    pub aliases: Json<Vec<String>>,
    #[schemars(with = "Vec<String>")]
    pub domains: Json<Vec<String>>,
    pub classification: Option<String>,
    pub is_active: bool,
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generic success envelope used by mutation endpoints.
#[derive(Debug, Serialize, JsonSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Metadata accompanying list responses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResponseMeta {
    /// Total number of matching records.
    pub total: i64,
}

/// Envelope wrapping every successful payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data, meta: None }
    }

    pub fn with_meta(data: T, meta: ResponseMeta) -> Self {
        Self {
            data,
            meta: Some(meta),
        }
    }
}
