//! End-to-end import worker scenarios against an ephemeral database.

use chrono::Utc;
use focus_server::classifier::PersonaClassifier;
use focus_server::imports::queue::{ImportQueue, JobStatus};
use focus_server::imports::worker::ImportWorker;
use focus_server::test_support::{TestDatabase, TestDatabaseError};
use focus_server::week::current_week_start;
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::HashMap;
use std::io::Write;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping worker test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn linkedin_mapping() -> HashMap<String, String> {
    [
        ("First Name", "first_name"),
        ("Last Name", "last_name"),
        ("Email Address", "email"),
        ("Company", "company"),
        ("Position", "job_title"),
        ("URL", "linkedin_url"),
        ("Connected On", "connected_on"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

const CSV_HEADER: &str = "First Name,Last Name,Email Address,Company,Position,URL,Connected On\n";

/// Write a CSV into a fresh temp path the worker may delete afterwards.
fn write_csv(rows: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("focus-worker-tests");
    std::fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join(format!("{}.csv", uuid::Uuid::new_v4()));
    let mut file = std::fs::File::create(&path).expect("create csv");
    file.write_all(CSV_HEADER.as_bytes()).expect("write header");
    file.write_all(rows.as_bytes()).expect("write rows");
    path
}

async fn seed_personas(pool: &PgPool) {
    for (id, name, priority) in [("ana", "Ana", 1), ("luis", "Luis", 2), ("mateo", "Mateo", 3)] {
        sqlx::query(
            "INSERT INTO buyer_persona_priorities (buyer_persona_id, buyer_persona_name, priority)
             VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(name)
        .bind(priority)
        .execute(pool)
        .await
        .expect("seed priority");
    }
    for (keyword, persona, persona_name) in
        [("ceo", "ana", "Ana"), ("manager", "luis", "Luis"), ("vp", "luis", "Luis")]
    {
        sqlx::query(
            "INSERT INTO job_keywords (id, keyword, buyer_persona_id, buyer_persona_name)
             VALUES (gen_random_uuid()::text, $1, $2, $3)",
        )
        .bind(keyword)
        .bind(persona)
        .bind(persona_name)
        .execute(pool)
        .await
        .expect("seed keyword");
    }
}

async fn start_job(pool: &PgPool, rows: &str) -> String {
    let queue = ImportQueue::new(pool.clone());
    let path = write_csv(rows);
    let job_id = queue
        .create_job(
            "GB",
            current_week_start(),
            &path.to_string_lossy(),
            "checksum",
            "connections.csv",
            rows.lines().count() as i32,
            &[],
            &HashMap::new(),
        )
        .await
        .expect("create job");
    assert!(
        queue
            .set_column_mapping(&job_id, &linkedin_mapping())
            .await
            .expect("set mapping")
    );
    job_id
}

async fn run_to_completion(pool: &PgPool, job_id: &str) {
    let worker = ImportWorker::new(pool.clone(), PersonaClassifier::new(pool.clone()));
    let claimed = worker.tick().await.expect("tick succeeds");
    assert_eq!(claimed.as_deref(), Some(job_id));
}

const THREE_ROWS: &str = "Jane,Doe,jane@acme.com,Acme,CEO,https://linkedin.com/in/jane,09 feb 2026\n\
John,Roe,john@acme.com,Acme,Manager,https://linkedin.com/in/john,02 Dec 2025\n\
Mia,Ng,mia@beta.io,Beta,VP,https://linkedin.com/in/mia,32 feb 2026\n";

#[tokio::test]
async fn happy_path_insert_and_merge_rerun() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    // First run: everything is new.
    let job_id = start_job(&pool, THREE_ROWS).await;
    run_to_completion(&pool, &job_id).await;

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.expect("get").expect("exists");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, 3);
    assert_eq!(job.contacts_created, 3);
    assert_eq!(job.contacts_updated, 0);
    assert_eq!(job.conflicts_count, 0);
    assert_eq!(job.invalid_rows_count, 0);

    // Exactly one company per distinct name, despite two Acme rows.
    let companies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM companies")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(companies, 2);

    // CEO row classified through the seeded keyword.
    let (persona, date): (Option<String>, Option<chrono::NaiveDate>) = sqlx::query_as(
        "SELECT buyer_persona, first_connected_on_linkedin FROM contacts WHERE email = 'jane@acme.com'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(persona.as_deref(), Some("ana"));
    assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2026, 2, 9));

    // Row 3 has an invalid connected_on: contact created, date absent,
    // one parse failure recorded.
    let (mia_date,): (Option<chrono::NaiveDate>,) = sqlx::query_as(
        "SELECT first_connected_on_linkedin FROM contacts WHERE email = 'mia@beta.io'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(mia_date, None);
    let parse_failures: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM import_parse_failures WHERE job_id = $1",
    )
    .bind(&job_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(parse_failures, 1);

    // Exactly one primary email per contact.
    let bad_primaries: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM contacts c
         WHERE (SELECT COUNT(*) FROM jsonb_array_elements(c.emails) e
                WHERE (e->>'is_primary')::bool) <> 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(bad_primaries, 0);

    // Second run of the same file: re-runs are pure merges.
    let second_job = start_job(&pool, THREE_ROWS).await;
    run_to_completion(&pool, &second_job).await;

    let rerun = queue.get(&second_job).await.unwrap().unwrap();
    assert_eq!(rerun.status, JobStatus::Completed);
    assert_eq!(rerun.contacts_created, 0);
    assert_eq!(rerun.contacts_updated, 3);
    assert_eq!(rerun.conflicts_count, 0);

    let contacts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contacts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(contacts, 3);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn email_url_conflict_updates_email_side_only() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    sqlx::query(
        "INSERT INTO contacts (id, email, emails)
         VALUES ('contact-a', 'a@x.com', '[{\"email\":\"a@x.com\",\"is_primary\":true}]')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO contacts (id, linkedin_url, linkedin_url_normalized)
         VALUES ('contact-b', 'https://linkedin.com/in/b', 'https://linkedin.com/in/b')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let row = "Alex,Stone,a@x.com,Gamma,Director,https://linkedin.com/in/b,09 feb 2026\n";
    let job_id = start_job(&pool, row).await;
    run_to_completion(&pool, &job_id).await;

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.conflicts_count, 1);
    assert_eq!(job.contacts_updated, 1);
    assert_eq!(job.contacts_created, 0);

    let (reason,): (String,) = sqlx::query_as(
        "SELECT reason_code FROM import_conflicts WHERE job_id = $1",
    )
    .bind(&job_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(reason, "conflict_email_url_mismatch");

    // A got the name fill-in but not the LinkedIn URL.
    let (a_name, a_url): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT name, linkedin_url_normalized FROM contacts WHERE id = 'contact-a'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(a_name.as_deref(), Some("Alex Stone"));
    assert_eq!(a_url, None);

    // B untouched.
    let (b_updated_eq_created,): (bool,) = sqlx::query_as(
        "SELECT updated_at = created_at FROM contacts WHERE id = 'contact-b'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(b_updated_eq_created);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn row_without_identifiers_is_invalid() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    let row = ",,,Acme,CEO,,\n";
    let job_id = start_job(&pool, row).await;
    run_to_completion(&pool, &job_id).await;

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.invalid_rows_count, 1);
    assert_eq!(job.contacts_created, 0);
    assert_eq!(job.contacts_updated, 0);

    let (reason,): (String,) = sqlx::query_as(
        "SELECT reason_code FROM import_invalid_rows WHERE job_id = $1",
    )
    .bind(&job_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(reason, "invalid_missing_identifiers");

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn empty_csv_completes_with_zero_counters() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    let job_id = start_job(&pool, "").await;
    run_to_completion(&pool, &job_id).await;

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_rows, 0);
    assert_eq!(job.contacts_created, 0);
    assert_eq!(job.invalid_rows_count, 0);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn orphaned_job_is_recovered_and_reprocessed() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    let row = "Jane,Doe,jane@acme.com,Acme,CEO,https://linkedin.com/in/jane,09 feb 2026\n";
    let job_id = start_job(&pool, row).await;

    // Simulate a dead worker: processing with a 10-minute-old heartbeat.
    sqlx::query(
        "UPDATE import_jobs
         SET status = 'processing', worker_id = 'worker_dead',
             heartbeat_at = NOW() - INTERVAL '10 minutes'
         WHERE job_id = $1",
    )
    .bind(&job_id)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO import_locks (profile, job_id, worker_id, acquired_at, expires_at)
         VALUES ('GB', $1, 'worker_dead', NOW() - INTERVAL '10 minutes', NOW() - INTERVAL '5 minutes')",
    )
    .bind(&job_id)
    .execute(&pool)
    .await
    .unwrap();

    let queue = ImportQueue::new(pool.clone());
    let recovered = queue.recover_orphans().await.expect("recovery");
    assert_eq!(recovered, vec![job_id.clone()]);

    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::PendingRetry);
    assert_eq!(job.attempts, 1);
    let retry_after = job.retry_after.expect("retry_after set");
    let delta = (retry_after - Utc::now()).num_seconds();
    assert!((50..=70).contains(&delta), "expected ~60s backoff, got {delta}s");

    let locks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM import_locks WHERE job_id = $1")
        .bind(&job_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(locks, 0);

    // Backoff elapses; the next tick claims and completes the job.
    sqlx::query("UPDATE import_jobs SET retry_after = NOW() - INTERVAL '1 second' WHERE job_id = $1")
        .bind(&job_id)
        .execute(&pool)
        .await
        .unwrap();
    run_to_completion(&pool, &job_id).await;

    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.contacts_created, 1);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn profile_lock_contention_defers_the_job() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    // A live lock held by some other job on the same profile.
    sqlx::query(
        "INSERT INTO import_locks (profile, job_id, worker_id, acquired_at, expires_at)
         VALUES ('GB', 'other-job', 'worker_other', NOW(), NOW() + INTERVAL '5 minutes')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let row = "Jane,Doe,jane@acme.com,Acme,CEO,https://linkedin.com/in/jane,09 feb 2026\n";
    let job_id = start_job(&pool, row).await;

    let worker = ImportWorker::new(pool.clone(), PersonaClassifier::new(pool.clone()));
    worker.tick().await.expect("tick succeeds");

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::PendingRetry);
    // Contention never burns an attempt.
    assert_eq!(job.attempts, 0);
    assert!(job.retry_after.is_some());

    // The foreign lock is still in place.
    let (holder,): (String,) =
        sqlx::query_as("SELECT job_id FROM import_locks WHERE profile = 'GB'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(holder, "other-job");

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn shared_company_is_created_once() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_personas(&pool).await;

    let mut rows = String::new();
    for i in 0..100 {
        rows.push_str(&format!(
            "User{i},Test,user{i}@corp.com,MegaCorp,Manager,https://linkedin.com/in/user{i},09 feb 2026\n"
        ));
    }
    let job_id = start_job(&pool, &rows).await;
    run_to_completion(&pool, &job_id).await;

    let megacorps: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM companies WHERE normalized_name = 'megacorp'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(megacorps, 1);

    let queue = ImportQueue::new(pool.clone());
    let job = queue.get(&job_id).await.unwrap().unwrap();
    assert_eq!(job.contacts_created, 100);

    test_db.close().await.expect("failed to drop test database");
}
