//! Read endpoints over contacts and companies.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::openapi;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, Company, Contact, ResponseMeta};

const CONTACT_COLUMNS: &str = "id, email, emails, linkedin_url, linkedin_url_normalized, name, \
    first_name, last_name, job_title, job_title_normalized, company, company_id, companies, \
    stage, stage_1_status, buyer_persona, buyer_persona_name, persona_locked, webinar_history, \
    email_cadence, source, source_details, linkedin_accepted_by, first_connected_on_linkedin, \
    created_at, updated_at";

#[openapi(tag = "Contacts")]
#[get("/contacts/<contact_id>")]
pub async fn get_contact(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    contact_id: &str,
) -> Result<Json<ApiResponse<Contact>>, ApiError> {
    let contact: Option<Contact> = sqlx::query_as(&format!(
        "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1"
    ))
    .bind(contact_id)
    .fetch_optional(pool.inner())
    .await?;

    contact
        .map(|c| Json(ApiResponse::new(c)))
        .ok_or_else(|| ApiError::NotFound(format!("contact '{contact_id}' not found")))
}

#[openapi(tag = "Contacts")]
#[get("/contacts?<buyer_persona>&<page>&<page_size>")]
pub async fn list_contacts(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    buyer_persona: Option<String>,
    page: Option<i64>,
    page_size: Option<i64>,
) -> Result<Json<ApiResponse<Vec<Contact>>>, ApiError> {
    let page = page.unwrap_or(1).max(1);
    let size = page_size.unwrap_or(25).clamp(1, 100);
    let offset = (page - 1) * size;

    let (contacts, total): (Vec<Contact>, i64) = match &buyer_persona {
        Some(persona) => {
            let rows = sqlx::query_as(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE buyer_persona = $1
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
            ))
            .bind(persona)
            .bind(size)
            .bind(offset)
            .fetch_all(pool.inner())
            .await?;
            let total =
                sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE buyer_persona = $1")
                    .bind(persona)
                    .fetch_one(pool.inner())
                    .await?;
            (rows, total)
        }
        None => {
            let rows = sqlx::query_as(&format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts
                 ORDER BY created_at DESC LIMIT $1 OFFSET $2"
            ))
            .bind(size)
            .bind(offset)
            .fetch_all(pool.inner())
            .await?;
            let total = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
                .fetch_one(pool.inner())
                .await?;
            (rows, total)
        }
    };

    Ok(Json(ApiResponse::with_meta(contacts, ResponseMeta { total })))
}

#[openapi(tag = "Contacts")]
#[get("/companies?<search>&<limit>")]
pub async fn list_companies(
    _user: AuthenticatedUser,
    pool: &State<PgPool>,
    search: Option<String>,
    limit: Option<i64>,
) -> Result<Json<ApiResponse<Vec<Company>>>, ApiError> {
    let limit = limit.unwrap_or(50).clamp(1, 200);
    let rows: Vec<Company> = match &search {
        Some(needle) => {
            sqlx::query_as(
                "SELECT id, name, normalized_name, aliases, domains, classification, is_active,
                        source, created_at, updated_at
                 FROM companies
                 WHERE normalized_name LIKE '%' || LOWER($1) || '%'
                 ORDER BY normalized_name LIMIT $2",
            )
            .bind(needle)
            .bind(limit)
            .fetch_all(pool.inner())
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT id, name, normalized_name, aliases, domains, classification, is_active,
                        source, created_at, updated_at
                 FROM companies ORDER BY normalized_name LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool.inner())
            .await?
        }
    };
    Ok(Json(ApiResponse::new(rows)))
}
