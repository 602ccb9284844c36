//! Per-row audit records: conflicts, invalid rows, parse failures.
//!
//! Every offending source row leaves one of these behind, tagged with the
//! job, profile, and week so per-week rollups need no joins. Rows are
//! retained 90 days (see the scheduler's retention sweep).

use chrono::{DateTime, NaiveDate, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::store::new_id;

/// Reason codes surfaced in `error_breakdown` and audit endpoints.
pub mod reason {
    pub const INVALID_MISSING_IDENTIFIERS: &str = "invalid_missing_identifiers";
    pub const CONFLICT_EMAIL_URL_MISMATCH: &str = "conflict_email_url_mismatch";
    pub const CONNECTED_ON_PARSE_FAILED: &str = "connected_on_parse_failed";
    pub const EMAIL_INVALID_FORMAT: &str = "email_invalid_format";
    pub const LINKEDIN_URL_INVALID_FORMAT: &str = "linkedin_url_invalid_format";
    pub const UNHANDLED_EXCEPTION: &str = "unhandled_exception";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Conflict,
    InvalidRow,
    ParseFailure,
}

impl AuditKind {
    pub fn table(self) -> &'static str {
        match self {
            Self::Conflict => "import_conflicts",
            Self::InvalidRow => "import_invalid_rows",
            Self::ParseFailure => "import_parse_failures",
        }
    }
}

/// An audit row prepared in memory during the main pass.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub kind: AuditKind,
    pub row_number: i32,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub raw_row: Option<Value>,
}

impl AuditEntry {
    pub fn new(kind: AuditKind, row_number: usize, reason_code: &str) -> Self {
        Self {
            kind,
            row_number: row_number as i32,
            reason_code: reason_code.to_string(),
            reason_detail: None,
            raw_row: None,
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.reason_detail = Some(detail.into());
        self
    }

    pub fn raw(mut self, raw: Value) -> Self {
        self.raw_row = Some(raw);
        self
    }
}

/// Stored audit row as served by the detail endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, JsonSchema)]
pub struct AuditRow {
    pub id: String,
    pub job_id: String,
    pub profile: String,
    pub week_start: NaiveDate,
    pub row_number: i32,
    pub reason_code: String,
    pub reason_detail: Option<String>,
    pub raw_row: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Bulk-insert a batch of audit entries via one UNNEST statement per kind.
pub async fn insert_batch(
    pool: &PgPool,
    job_id: &str,
    profile: &str,
    week_start: NaiveDate,
    entries: &[AuditEntry],
) -> Result<(), sqlx::Error> {
    for kind in [AuditKind::Conflict, AuditKind::InvalidRow, AuditKind::ParseFailure] {
        let of_kind: Vec<&AuditEntry> = entries.iter().filter(|e| e.kind == kind).collect();
        if of_kind.is_empty() {
            continue;
        }

        let mut ids = Vec::with_capacity(of_kind.len());
        let mut row_numbers = Vec::with_capacity(of_kind.len());
        let mut reason_codes = Vec::with_capacity(of_kind.len());
        let mut reason_details = Vec::with_capacity(of_kind.len());
        let mut raw_rows = Vec::with_capacity(of_kind.len());

        for entry in &of_kind {
            ids.push(new_id());
            row_numbers.push(entry.row_number);
            reason_codes.push(entry.reason_code.clone());
            reason_details.push(entry.reason_detail.clone());
            raw_rows.push(entry.raw_row.clone().unwrap_or(Value::Null));
        }

        let query = format!(
            "INSERT INTO {} (id, job_id, profile, week_start, row_number, reason_code, reason_detail, raw_row)
             SELECT t.id, $1, $2, $3, t.row_number, t.reason_code, t.reason_detail, t.raw_row
             FROM UNNEST($4::text[], $5::int[], $6::text[], $7::text[], $8::jsonb[])
                  AS t(id, row_number, reason_code, reason_detail, raw_row)",
            kind.table()
        );

        sqlx::query(&query)
            .bind(job_id)
            .bind(profile)
            .bind(week_start)
            .bind(&ids)
            .bind(&row_numbers)
            .bind(&reason_codes)
            .bind(&reason_details)
            .bind(&raw_rows)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Fetch audit rows of one kind for a job, oldest first.
pub async fn list_for_job(
    pool: &PgPool,
    kind: AuditKind,
    job_id: &str,
    limit: i64,
) -> Result<Vec<AuditRow>, sqlx::Error> {
    let query = format!(
        "SELECT id, job_id, profile, week_start, row_number, reason_code, reason_detail,
                raw_row, created_at
         FROM {} WHERE job_id = $1 ORDER BY row_number LIMIT $2",
        kind.table()
    );
    sqlx::query_as(&query)
        .bind(job_id)
        .bind(limit)
        .fetch_all(pool)
        .await
}

/// Group a job's audit rows by reason code across all three tables.
pub async fn breakdown_for_job(
    pool: &PgPool,
    job_id: &str,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let mut breakdown = HashMap::new();
    for kind in [AuditKind::Conflict, AuditKind::InvalidRow, AuditKind::ParseFailure] {
        let query = format!(
            "SELECT reason_code, COUNT(*) FROM {} WHERE job_id = $1 GROUP BY reason_code",
            kind.table()
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&query).bind(job_id).fetch_all(pool).await?;
        for (code, count) in rows {
            *breakdown.entry(code).or_insert(0) += count;
        }
    }
    Ok(breakdown)
}

/// Render audit rows as a downloadable CSV document.
pub fn to_csv(rows: &[AuditRow]) -> String {
    let mut out = String::from("row_number,reason_code,reason_detail,created_at\n");
    for row in rows {
        let detail = row.reason_detail.as_deref().unwrap_or("").replace('"', "\"\"");
        out.push_str(&format!(
            "{},{},\"{}\",{}\n",
            row.row_number,
            row.reason_code,
            detail,
            row.created_at.to_rfc3339()
        ));
    }
    out
}

/// Delete audit rows older than the retention window; returns rows removed.
pub async fn sweep_expired(pool: &PgPool, ttl_days: i64) -> Result<u64, sqlx::Error> {
    let mut total = 0;
    for kind in [AuditKind::Conflict, AuditKind::InvalidRow, AuditKind::ParseFailure] {
        let query = format!(
            "DELETE FROM {} WHERE created_at < NOW() - make_interval(days => $1)",
            kind.table()
        );
        let result = sqlx::query(&query).bind(ttl_days as i32).execute(pool).await?;
        total += result.rows_affected();
    }
    Ok(total)
}
