//! The import worker: runs one claimed job to a terminal status.
//!
//! # Pipeline
//!
//! 1. **Claim** - done by the dispatch tick via [`ImportQueue::claim_next`].
//! 2. **Lock** - acquire the profile lock; contention defers the job 60 s.
//! 3. **Pre-pass** - stream the file once for the row count, once for the
//!    distinct job titles and company names.
//! 4. **Resolve** - classify every distinct title, resolve every company in
//!    one bulk round-trip.
//! 5. **Main pass** - stream rows in batches of 500: normalize, validate,
//!    look up existing contacts by email and LinkedIn URL, build merge or
//!    insert operations, execute one unordered bulk write per batch.
//! 6. **Heartbeat** - at most every 30 s: progress counters, lock refresh,
//!    cooperative cancellation check.
//! 7. **Complete** - final stats, error breakdown, per-week task rollup,
//!    file deletion, lock release.
//!
//! Row-level problems (invalid rows, unparseable fields, identifier
//! conflicts) become audit rows and counters, never job failures. Anything
//! else is recorded in `attempt_history` and retried per the backoff policy.

use chrono::NaiveDate;
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::time::Instant;
use thiserror::Error;

use crate::classifier::{Classification, PersonaClassifier};
use crate::config::{BATCH_SIZE, HEARTBEAT_INTERVAL_SECS};
use crate::imports::audit::{self, AuditEntry, AuditKind, reason};
use crate::imports::companies::{self, ResolvedCompany};
use crate::imports::csv_stream::{CsvError, CsvFile, CsvRow, MappedColumns};
use crate::imports::dates::parse_connected_on;
use crate::imports::locks;
use crate::imports::normalize::{email_looks_valid, normalize_email, normalize_linkedin_url};
use crate::imports::queue::{ImportJobRecord, ImportQueue, JobStatus, Progress};
use crate::store::bulk::{self, BulkOp};
use crate::store::new_id;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("csv error: {0}")]
    Csv(#[from] CsvError),
    #[error("job has no column mapping")]
    MissingMapping,
}

/// How a processing run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    LockContention,
}

pub struct ImportWorker {
    pool: PgPool,
    queue: ImportQueue,
    classifier: PersonaClassifier,
    worker_id: String,
}

/// One normalized, validated source row ready for the merge phase.
#[derive(Debug, Clone)]
struct PreparedRow {
    row_number: usize,
    email: Option<String>,
    linkedin_url_raw: Option<String>,
    linkedin_url_normalized: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    full_name: Option<String>,
    job_title: Option<String>,
    company: Option<ResolvedCompany>,
    connected_on: Option<NaiveDate>,
    classification: Option<Classification>,
}

/// Existing contact fields the merge rules need.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ExistingContact {
    id: String,
    email: Option<String>,
    emails: Json<Vec<serde_json::Value>>,
    linkedin_url_normalized: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Insert,
    Update,
}

impl ImportWorker {
    pub fn new(pool: PgPool, classifier: PersonaClassifier) -> Self {
        Self {
            queue: ImportQueue::new(pool.clone()),
            pool,
            classifier,
            worker_id: format!("worker_{}", std::process::id()),
        }
    }

    pub fn queue(&self) -> &ImportQueue {
        &self.queue
    }

    /// One dispatch tick: recover orphans, then claim and run one job.
    pub async fn tick(&self) -> Result<Option<String>, sqlx::Error> {
        let recovered = self.queue.recover_orphans().await?;
        if !recovered.is_empty() {
            log::info!("recovered {} orphaned jobs", recovered.len());
        }

        let Some(job) = self.queue.claim_next(&self.worker_id).await? else {
            return Ok(None);
        };
        let job_id = job.job_id.clone();
        log::info!("claimed import job {} for profile {}", job_id, job.profile);

        match self.process_job(&job).await {
            Ok(RunOutcome::Completed) => {
                log::info!("job {}: completed", job_id);
            }
            Ok(RunOutcome::Cancelled) => {
                log::warn!("job {}: cancelled by operator", job_id);
            }
            Ok(RunOutcome::LockContention) => {
                log::info!("job {}: profile busy, deferred 60s", job_id);
                self.queue.defer(&job_id, 60).await?;
            }
            Err(e) => {
                log::error!("job {}: failed: {}", job_id, e);
                let outcome = self
                    .queue
                    .record_attempt_failure(&job_id, &self.worker_id, job.attempts, &e.to_string())
                    .await?;
                locks::release_by_job(&self.pool, &job_id).await?;
                if outcome == JobStatus::Failed {
                    log::error!("job {}: terminally failed after max attempts", job_id);
                }
            }
        }

        Ok(Some(job_id))
    }

    async fn process_job(&self, job: &ImportJobRecord) -> Result<RunOutcome, WorkerError> {
        let mapping = job
            .column_mapping
            .as_ref()
            .map(|m| m.0.clone())
            .ok_or(WorkerError::MissingMapping)?;

        // Phase 2: profile lock.
        if !locks::acquire(&self.pool, &job.profile, &job.job_id, &self.worker_id).await? {
            return Ok(RunOutcome::LockContention);
        }

        let result = self.run_locked(job, &mapping).await;

        // The lock is released on every exit path; errors propagate after.
        locks::release(&self.pool, &job.profile, &job.job_id).await?;
        result
    }

    async fn run_locked(
        &self,
        job: &ImportJobRecord,
        mapping: &HashMap<String, String>,
    ) -> Result<RunOutcome, WorkerError> {
        // Phase 3: pre-pass.
        let csv = CsvFile::open(&job.file_path)?;
        let columns = MappedColumns::resolve(csv.headers(), mapping);
        let total_rows = csv.count_rows()?;
        log::info!("job {}: {} data rows", job.job_id, total_rows);

        let mut distinct_titles: BTreeSet<String> = BTreeSet::new();
        let mut distinct_companies: BTreeSet<String> = BTreeSet::new();
        for row in csv.rows()? {
            let row = row?;
            if let Some(title) = columns.get(&row, columns.job_title) {
                distinct_titles.insert(title.to_string());
            }
            if let Some(company) = columns.get(&row, columns.company) {
                distinct_companies.insert(company.to_string());
            }
        }

        // Phase 4: classify titles once each, resolve companies in bulk.
        let titles: Vec<String> = distinct_titles.into_iter().collect();
        let classifications = self.classifier.classify_batch(&titles).await?;

        let company_names: Vec<String> = distinct_companies.into_iter().collect();
        let companies = companies::resolve_bulk(&self.pool, &company_names).await?;
        log::info!(
            "job {}: {} distinct titles classified, {} companies resolved",
            job.job_id,
            titles.len(),
            companies.len()
        );

        // Phase 5: main pass.
        let mut progress = Progress::default();
        let mut breakdown: HashMap<String, i64> = HashMap::new();
        let mut last_heartbeat = Instant::now();

        let mut batch: Vec<CsvRow> = Vec::with_capacity(BATCH_SIZE);
        let mut rows = csv.rows()?;

        loop {
            batch.clear();
            for row in rows.by_ref().take(BATCH_SIZE) {
                batch.push(row?);
            }
            if batch.is_empty() {
                break;
            }

            self.process_batch(
                job,
                &columns,
                &classifications,
                &companies,
                &batch,
                &mut progress,
                &mut breakdown,
            )
            .await?;

            progress.processed_rows += batch.len() as i32;
            progress.progress_percent = if total_rows == 0 {
                100.0
            } else {
                (progress.processed_rows as f32 / total_rows as f32) * 100.0
            };

            // Phase 6: heartbeat and cooperative cancellation.
            if last_heartbeat.elapsed().as_secs() >= HEARTBEAT_INTERVAL_SECS as u64 {
                self.queue
                    .heartbeat(&job.job_id, &self.worker_id, &progress)
                    .await?;
                locks::refresh(&self.pool, &job.profile, &job.job_id).await?;
                last_heartbeat = Instant::now();

                if self.queue.current_status(&job.job_id).await? == Some(JobStatus::Cancelled) {
                    self.remove_source_file(job);
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }

        // Phase 7: completion.
        self.queue.complete(&job.job_id, &progress, &breakdown).await?;

        sqlx::query(
            "INSERT INTO import_tasks (profile, week_start, import_completed, completed_at)
             VALUES ($1, $2, TRUE, NOW())
             ON CONFLICT (profile, week_start)
             DO UPDATE SET import_completed = TRUE, completed_at = NOW()",
        )
        .bind(&job.profile)
        .bind(job.week_start)
        .execute(&self.pool)
        .await?;

        self.remove_source_file(job);

        log::info!(
            "job {}: {} processed, {} created, {} updated, {} conflicts, {} invalid",
            job.job_id,
            progress.processed_rows,
            progress.contacts_created,
            progress.contacts_updated,
            progress.conflicts_count,
            progress.invalid_rows_count
        );

        Ok(RunOutcome::Completed)
    }

    fn remove_source_file(&self, job: &ImportJobRecord) {
        if let Err(e) = std::fs::remove_file(&job.file_path) {
            log::warn!("job {}: could not delete {}: {}", job.job_id, job.file_path, e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        job: &ImportJobRecord,
        columns: &MappedColumns,
        classifications: &HashMap<String, Classification>,
        companies: &HashMap<String, ResolvedCompany>,
        batch: &[CsvRow],
        progress: &mut Progress,
        breakdown: &mut HashMap<String, i64>,
    ) -> Result<(), WorkerError> {
        let mut audit_entries: Vec<AuditEntry> = Vec::new();
        let mut prepared: Vec<PreparedRow> = Vec::new();

        for row in batch {
            match prepare_row(row, columns, classifications, companies, &mut audit_entries) {
                Some(prepared_row) => prepared.push(prepared_row),
                None => progress.invalid_rows_count += 1,
            }
        }

        // Two multi-key lookups for the whole batch.
        let emails: Vec<String> = prepared.iter().filter_map(|r| r.email.clone()).collect();
        let urls: Vec<String> = prepared
            .iter()
            .filter_map(|r| r.linkedin_url_normalized.clone())
            .collect();

        let (by_email, by_url) = self.lookup_existing(&emails, &urls).await?;

        let mut ops: Vec<BulkOp> = Vec::new();
        let mut op_kinds: Vec<OpKind> = Vec::new();

        for row in &prepared {
            if let Some(classification) = &row.classification {
                *progress
                    .persona_tally
                    .entry(classification.buyer_persona_id.clone())
                    .or_insert(0) += 1;
            }

            let email_match = row.email.as_ref().and_then(|e| by_email.get(e));
            let url_match = row
                .linkedin_url_normalized
                .as_ref()
                .and_then(|u| by_url.get(u));

            match (email_match, url_match) {
                (Some(by_mail), Some(by_link)) if by_mail.id != by_link.id => {
                    // Both identifiers resolve, to different contacts. Record
                    // the conflict and update the email side only, leaving
                    // its LinkedIn URL untouched.
                    progress.conflicts_count += 1;
                    *breakdown
                        .entry(reason::CONFLICT_EMAIL_URL_MISMATCH.to_string())
                        .or_insert(0) += 1;
                    audit_entries.push(
                        AuditEntry::new(
                            AuditKind::Conflict,
                            row.row_number,
                            reason::CONFLICT_EMAIL_URL_MISMATCH,
                        )
                        .detail(format!(
                            "email matches contact {}, linkedin url matches contact {}",
                            by_mail.id, by_link.id
                        ))
                        .raw(json!({
                            "email": &row.email,
                            "linkedin_url": &row.linkedin_url_raw,
                        })),
                    );

                    ops.push(build_update_op(job, row, &by_mail.id, true));
                    op_kinds.push(OpKind::Update);
                }
                (Some(existing), _) | (None, Some(existing)) => {
                    ops.push(build_update_op(job, row, &existing.id, false));
                    op_kinds.push(OpKind::Update);
                }
                (None, None) => {
                    ops.push(build_insert_op(job, row));
                    op_kinds.push(OpKind::Insert);
                }
            }
        }

        if !ops.is_empty() {
            let report = bulk::unordered(&self.pool, ops).await?;
            for error in report.errors() {
                log::warn!(
                    "job {}: bulk op {} failed: {}",
                    job.job_id,
                    error.index,
                    error.message
                );
            }

            for (index, kind) in op_kinds.iter().enumerate() {
                match (kind, report.rows_affected(index)) {
                    (OpKind::Insert, Some(1)) => progress.contacts_created += 1,
                    // Insert gated out by the NOT EXISTS guard: an earlier
                    // row in this batch already created the contact.
                    (OpKind::Insert, Some(_)) => {}
                    (OpKind::Update, Some(n)) if n > 0 => progress.contacts_updated += 1,
                    _ => {}
                }
            }
        }

        // Tally audit reasons, then persist the batch's audit rows.
        for entry in &audit_entries {
            if entry.kind != AuditKind::Conflict {
                *breakdown.entry(entry.reason_code.clone()).or_insert(0) += 1;
            }
            if entry.kind == AuditKind::ParseFailure {
                progress.parse_failures_count += 1;
            }
        }
        audit::insert_batch(
            &self.pool,
            &job.job_id,
            &job.profile,
            job.week_start,
            &audit_entries,
        )
        .await?;

        Ok(())
    }

    /// Find existing contacts by primary or secondary email and by
    /// normalized LinkedIn URL. Two queries per batch.
    async fn lookup_existing(
        &self,
        emails: &[String],
        urls: &[String],
    ) -> Result<
        (
            HashMap<String, ExistingContact>,
            HashMap<String, ExistingContact>,
        ),
        sqlx::Error,
    > {
        let mut by_email: HashMap<String, ExistingContact> = HashMap::new();
        let mut by_url: HashMap<String, ExistingContact> = HashMap::new();

        if !emails.is_empty() {
            let rows: Vec<ExistingContact> = sqlx::query_as(
                "SELECT id, email, emails, linkedin_url_normalized
                 FROM contacts
                 WHERE email = ANY($1)
                    OR EXISTS (
                        SELECT 1 FROM jsonb_array_elements(emails) e
                        WHERE e->>'email' = ANY($1)
                    )",
            )
            .bind(emails)
            .fetch_all(&self.pool)
            .await?;

            for contact in rows {
                if let Some(email) = &contact.email {
                    by_email.entry(email.clone()).or_insert_with(|| contact.clone());
                }
                for entry in &contact.emails.0 {
                    if let Some(email) = entry.get("email").and_then(|v| v.as_str()) {
                        by_email
                            .entry(email.to_string())
                            .or_insert_with(|| contact.clone());
                    }
                }
            }
        }

        if !urls.is_empty() {
            let rows: Vec<ExistingContact> = sqlx::query_as(
                "SELECT id, email, emails, linkedin_url_normalized
                 FROM contacts WHERE linkedin_url_normalized = ANY($1)",
            )
            .bind(urls)
            .fetch_all(&self.pool)
            .await?;

            for contact in rows {
                if let Some(url) = &contact.linkedin_url_normalized {
                    by_url.entry(url.clone()).or_insert(contact);
                }
            }
        }

        Ok((by_email, by_url))
    }
}

/// Normalize and validate one source row. Returns None for invalid rows
/// (audit entry already pushed); parse failures keep the row alive with the
/// offending field absent.
fn prepare_row(
    row: &CsvRow,
    columns: &MappedColumns,
    classifications: &HashMap<String, Classification>,
    companies: &HashMap<String, ResolvedCompany>,
    audit_entries: &mut Vec<AuditEntry>,
) -> Option<PreparedRow> {
    let first_name = columns.get(row, columns.first_name).map(|s| s.to_string());
    let last_name = columns.get(row, columns.last_name).map(|s| s.to_string());
    let full_name = match (&first_name, &last_name) {
        (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
        (Some(first), None) => Some(first.clone()),
        (None, Some(last)) => Some(last.clone()),
        (None, None) => None,
    };

    let raw_email = columns.get(row, columns.email);
    let email = match raw_email {
        Some(raw) => match normalize_email(raw) {
            Some(normalized) if email_looks_valid(&normalized) => Some(normalized),
            _ => {
                audit_entries.push(
                    AuditEntry::new(
                        AuditKind::ParseFailure,
                        row.row_number,
                        reason::EMAIL_INVALID_FORMAT,
                    )
                    .detail(raw.to_string()),
                );
                None
            }
        },
        None => None,
    };

    let raw_url = columns.get(row, columns.linkedin_url);
    let linkedin_url_normalized = match raw_url {
        Some(raw) => match normalize_linkedin_url(raw) {
            Some(normalized) => Some(normalized),
            None => {
                audit_entries.push(
                    AuditEntry::new(
                        AuditKind::ParseFailure,
                        row.row_number,
                        reason::LINKEDIN_URL_INVALID_FORMAT,
                    )
                    .detail(raw.to_string()),
                );
                None
            }
        },
        None => None,
    };

    // A row with neither a name nor a usable LinkedIn URL is unusable.
    if full_name.is_none() && linkedin_url_normalized.is_none() {
        audit_entries.push(
            AuditEntry::new(
                AuditKind::InvalidRow,
                row.row_number,
                reason::INVALID_MISSING_IDENTIFIERS,
            )
            .raw(json!(&row.values)),
        );
        return None;
    }

    let raw_connected = columns.get(row, columns.connected_on);
    let connected_on = match raw_connected {
        Some(raw) => match parse_connected_on(raw) {
            Some(date) => Some(date),
            None => {
                audit_entries.push(
                    AuditEntry::new(
                        AuditKind::ParseFailure,
                        row.row_number,
                        reason::CONNECTED_ON_PARSE_FAILED,
                    )
                    .detail(raw.to_string()),
                );
                None
            }
        },
        None => None,
    };

    let job_title = columns.get(row, columns.job_title).map(|s| s.to_string());
    let classification = job_title.as_ref().and_then(|t| classifications.get(t)).cloned();

    let company = columns
        .get(row, columns.company)
        .and_then(|raw| crate::imports::normalize::normalize_company_name(raw))
        .and_then(|normalized| companies.get(&normalized))
        .cloned();

    Some(PreparedRow {
        row_number: row.row_number,
        email,
        linkedin_url_raw: raw_url.map(|s| s.to_string()),
        linkedin_url_normalized,
        first_name,
        last_name,
        full_name,
        job_title,
        company,
        connected_on,
        classification,
    })
}

/// Merge an inbound row into an existing contact.
///
/// Field rules: names fill empty slots only; the job title always follows
/// the export when it differs (case-insensitively), carrying the persona
/// with it unless the record is persona-locked; LinkedIn URL fills an empty
/// slot only and never moves on a conflict row; company links never replace
/// a primary; inbound emails append as secondaries when absent.
fn build_update_op(job: &ImportJobRecord, row: &PreparedRow, contact_id: &str, is_conflict: bool) -> BulkOp {
    let contact_id = contact_id.to_string();
    let profile = job.profile.clone();
    let row = row.clone();

    bulk::op(move |conn| {
        Box::pin(async move {
            let (persona_id, persona_name, normalized_title) = match &row.classification {
                Some(c) => (
                    Some(c.buyer_persona_id.clone()),
                    Some(c.buyer_persona_name.clone()),
                    Some(c.normalized_job_title.clone()),
                ),
                None => (None, None, None),
            };
            let (company_id, company_name) = match &row.company {
                Some(c) => (Some(c.id.clone()), Some(c.name.clone())),
                None => (None, None),
            };

            let result = sqlx::query(
                r#"UPDATE contacts SET
                    first_name = CASE WHEN (first_name IS NULL OR first_name = '') THEN COALESCE($2, first_name) ELSE first_name END,
                    last_name = CASE WHEN (last_name IS NULL OR last_name = '') THEN COALESCE($3, last_name) ELSE last_name END,
                    name = CASE WHEN (name IS NULL OR name = '') THEN COALESCE($4, name) ELSE name END,
                    job_title = CASE
                        WHEN $5::text IS NOT NULL AND LOWER(COALESCE(job_title, '')) IS DISTINCT FROM LOWER($5)
                        THEN $5 ELSE job_title END,
                    job_title_normalized = CASE
                        WHEN $5::text IS NOT NULL AND LOWER(COALESCE(job_title, '')) IS DISTINCT FROM LOWER($5)
                        THEN $6 ELSE job_title_normalized END,
                    buyer_persona = CASE
                        WHEN $5::text IS NOT NULL AND LOWER(COALESCE(job_title, '')) IS DISTINCT FROM LOWER($5)
                             AND NOT persona_locked AND $7::text IS NOT NULL
                        THEN $7 ELSE buyer_persona END,
                    buyer_persona_name = CASE
                        WHEN $5::text IS NOT NULL AND LOWER(COALESCE(job_title, '')) IS DISTINCT FROM LOWER($5)
                             AND NOT persona_locked AND $7::text IS NOT NULL
                        THEN $8 ELSE buyer_persona_name END,
                    linkedin_url = CASE
                        WHEN NOT $9 AND $10::text IS NOT NULL AND (linkedin_url IS NULL OR linkedin_url = '')
                        THEN $10 ELSE linkedin_url END,
                    linkedin_url_normalized = CASE
                        WHEN NOT $9 AND $11::text IS NOT NULL
                             AND (linkedin_url_normalized IS NULL OR linkedin_url_normalized = '')
                        THEN $11 ELSE linkedin_url_normalized END,
                    first_connected_on_linkedin = COALESCE(first_connected_on_linkedin, $12),
                    company = CASE
                        WHEN $13::text IS NOT NULL AND (company_id IS NULL OR company_id = '')
                        THEN $14 ELSE company END,
                    company_id = CASE
                        WHEN $13::text IS NOT NULL AND (company_id IS NULL OR company_id = '')
                        THEN $13 ELSE company_id END,
                    companies = CASE
                        WHEN $13::text IS NULL THEN companies
                        WHEN EXISTS (
                            SELECT 1 FROM jsonb_array_elements(companies) c
                            WHERE c->>'company_id' = $13
                        ) THEN companies
                        WHEN (company_id IS NULL OR company_id = '')
                        THEN companies || jsonb_build_array(jsonb_build_object(
                            'company_id', $13, 'company_name', $14, 'is_primary', true))
                        WHEN company_id <> $13
                        THEN companies || jsonb_build_array(jsonb_build_object(
                            'company_id', $13, 'company_name', $14, 'is_primary', false))
                        ELSE companies END,
                    emails = CASE
                        WHEN $15::text IS NOT NULL
                             AND ($15 IS DISTINCT FROM email)
                             AND NOT EXISTS (
                                 SELECT 1 FROM jsonb_array_elements(emails) e
                                 WHERE e->>'email' = $15
                             )
                        THEN emails || jsonb_build_array(jsonb_build_object(
                            'email', $15, 'is_primary', false))
                        ELSE emails END,
                    stage_1_status = 'accepted',
                    linkedin_accepted_by = $16,
                    updated_at = NOW()
                WHERE id = $1"#,
            )
            .bind(&contact_id)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .bind(&row.full_name)
            .bind(&row.job_title)
            .bind(&normalized_title)
            .bind(&persona_id)
            .bind(&persona_name)
            .bind(is_conflict)
            .bind(&row.linkedin_url_raw)
            .bind(&row.linkedin_url_normalized)
            .bind(row.connected_on)
            .bind(&company_id)
            .bind(&company_name)
            .bind(&row.email)
            .bind(&profile)
            .execute(&mut *conn)
            .await?;
            Ok(result.rows_affected())
        })
    })
}

/// Insert a new contact, gated by the normalized URL when available, else
/// by email, so re-running the same file never duplicates.
fn build_insert_op(job: &ImportJobRecord, row: &PreparedRow) -> BulkOp {
    let profile = job.profile.clone();
    let row = row.clone();

    bulk::op(move |conn| {
        Box::pin(async move {
            let (persona_id, persona_name, normalized_title) = match &row.classification {
                Some(c) => (
                    Some(c.buyer_persona_id.clone()),
                    Some(c.buyer_persona_name.clone()),
                    Some(c.normalized_job_title.clone()),
                ),
                None => (None, None, None),
            };
            let (company_id, company_name) = match &row.company {
                Some(c) => (Some(c.id.clone()), Some(c.name.clone())),
                None => (None, None),
            };

            let emails = match &row.email {
                Some(email) => json!([{"email": email, "is_primary": true}]),
                None => json!([]),
            };
            let companies = match (&company_id, &company_name) {
                (Some(id), Some(name)) => {
                    json!([{"company_id": id, "company_name": name, "is_primary": true}])
                }
                _ => json!([]),
            };

            let result = sqlx::query(
                r#"INSERT INTO contacts
                    (id, email, emails, linkedin_url, linkedin_url_normalized,
                     name, first_name, last_name, job_title, job_title_normalized,
                     company, company_id, companies, stage, stage_1_status,
                     buyer_persona, buyer_persona_name, source, source_details,
                     linkedin_accepted_by, first_connected_on_linkedin)
                SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                       $11, $12, $13, 1, 'accepted', $14, $15,
                       'linkedin_import', $16, $16, $17
                WHERE NOT EXISTS (
                    SELECT 1 FROM contacts
                    WHERE ($5::text IS NOT NULL AND linkedin_url_normalized = $5)
                       OR ($5::text IS NULL AND $2::text IS NOT NULL AND email = $2)
                )"#,
            )
            .bind(new_id())
            .bind(&row.email)
            .bind(emails)
            .bind(&row.linkedin_url_raw)
            .bind(&row.linkedin_url_normalized)
            .bind(&row.full_name)
            .bind(&row.first_name)
            .bind(&row.last_name)
            .bind(&row.job_title)
            .bind(&normalized_title)
            .bind(&company_name)
            .bind(&company_id)
            .bind(companies)
            .bind(&persona_id)
            .bind(&persona_name)
            .bind(&profile)
            .bind(row.connected_on)
            .execute(&mut *conn)
            .await?;
            Ok(result.rows_affected())
        })
    })
}
