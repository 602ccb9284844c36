//! Route-level behavior through a local Rocket client.

use focus_server::routes;
use focus_server::test_support::{TestDatabase, TestDatabaseError, TestRocketBuilder, test_token};
use rocket::http::{ContentType, Header, Status};

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping route test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn bearer() -> Header<'static> {
    Header::new("Authorization", format!("Bearer {}", test_token("ops@leaderlix.test")))
}

#[tokio::test]
async fn guarded_routes_require_a_token() {
    let Some(test_db) = provision().await else {
        return;
    };

    let client = TestRocketBuilder::new()
        .manage_pg_pool(test_db.pool_clone())
        .mount_api_routes(rocket::routes![
            routes::keywords::list_keywords,
            routes::imports::progress,
        ])
        .async_client()
        .await;

    let response = client.get("/api/v1/job-keywords").dispatch().await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .get("/api/v1/job-keywords")
        .header(Header::new("Authorization", "Bearer not-a-token"))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Unauthorized);

    let response = client
        .get("/api/v1/job-keywords")
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn progress_returns_404_for_unknown_job() {
    let Some(test_db) = provision().await else {
        return;
    };

    let client = TestRocketBuilder::new()
        .manage_pg_pool(test_db.pool_clone())
        .mount_api_routes(rocket::routes![routes::imports::progress])
        .async_client()
        .await;

    let response = client
        .get("/api/v1/linkedin-import/jobs/does-not-exist")
        .header(bearer())
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::NotFound);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn start_validates_the_column_mapping() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();

    let job_id = focus_server::imports::queue::ImportQueue::new(pool.clone())
        .create_job(
            "GB",
            focus_server::week::current_week_start(),
            "/tmp/nonexistent.csv",
            "checksum",
            "connections.csv",
            0,
            &[],
            &std::collections::HashMap::new(),
        )
        .await
        .expect("create job");

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool)
        .mount_api_routes(rocket::routes![routes::imports::start])
        .async_client()
        .await;

    // Empty mapping.
    let response = client
        .post(format!("/api/v1/linkedin-import/jobs/{job_id}/start"))
        .header(bearer())
        .header(ContentType::JSON)
        .body(r#"{"column_mapping": {}}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    // Unknown field name.
    let response = client
        .post(format!("/api/v1/linkedin-import/jobs/{job_id}/start"))
        .header(bearer())
        .header(ContentType::JSON)
        .body(r#"{"column_mapping": {"X": "shoe_size"}}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);

    // Valid mapping queues the job.
    let response = client
        .post(format!("/api/v1/linkedin-import/jobs/{job_id}/start"))
        .header(bearer())
        .header(ContentType::JSON)
        .body(r#"{"column_mapping": {"URL": "linkedin_url", "First Name": "first_name"}}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_string().await.expect("body");
    assert!(body.contains("queued"));

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn classify_reports_winner_and_all_matches() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();

    rocket_db_pools::sqlx::query(
        "INSERT INTO buyer_persona_priorities (buyer_persona_id, buyer_persona_name, priority)
         VALUES ('ana', 'Ana', 1)",
    )
    .execute(&pool)
    .await
    .unwrap();
    rocket_db_pools::sqlx::query(
        "INSERT INTO job_keywords (id, keyword, buyer_persona_id, buyer_persona_name)
         VALUES ('kw1', 'ceo', 'ana', 'Ana')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let client = TestRocketBuilder::new()
        .manage_pg_pool(pool)
        .mount_api_routes(rocket::routes![routes::keywords::classify])
        .async_client()
        .await;

    let response = client
        .post("/api/v1/job-keywords/classify")
        .header(bearer())
        .header(ContentType::JSON)
        .body(r#"{"job_title": "CEO & Founder"}"#)
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let body = response.into_string().await.expect("body");
    assert!(body.contains("\"buyer_persona_id\":\"ana\""));
    assert!(body.contains("\"is_default\":false"));

    let response = client
        .post("/api/v1/job-keywords/classify")
        .header(bearer())
        .header(ContentType::JSON)
        .body(r#"{"job_title": "Gardener"}"#)
        .dispatch()
        .await;
    let body = response.into_string().await.expect("body");
    assert!(body.contains("\"buyer_persona_id\":\"mateo\""));
    assert!(body.contains("\"is_default\":true"));

    test_db.close().await.expect("failed to drop test database");
}
