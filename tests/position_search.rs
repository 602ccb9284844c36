//! Position-search driver: rotation, quota, rate-limit alerts, semaphore.

use focus_server::outbound::{ActorClient, OutboundError};
use focus_server::position_search::{self, SearchRunOutcome};
use focus_server::semaphore::{self, Status};
use focus_server::test_support::{TestDatabase, TestDatabaseError};
use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::{Value, json};
use std::sync::Mutex;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping position search test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

/// Actor stub returning a canned response per call.
struct StubActor {
    responses: Mutex<Vec<Result<Vec<Value>, OutboundError>>>,
}

impl StubActor {
    fn new(responses: Vec<Result<Vec<Value>, OutboundError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[rocket::async_trait]
impl ActorClient for StubActor {
    async fn run_actor(&self, _actor_id: &str, _input: &Value) -> Result<Vec<Value>, OutboundError> {
        self.responses
            .lock()
            .expect("stub lock")
            .pop()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

async fn seed(pool: &PgPool) {
    for (id, name, priority) in [("ana", "Ana", 1), ("luis", "Luis", 2), ("zoe", "Zoe", 3)] {
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
    for keyword in ["chief executive", "founder"] {
        sqlx::query(
            "INSERT INTO position_keywords (id, buyer_persona_id, keyword)
             VALUES (gen_random_uuid()::text, 'ana', $1)",
        )
        .bind(keyword)
        .execute(pool)
        .await
        .expect("seed rotation keyword");
    }
}

#[tokio::test]
async fn successful_run_inserts_deduped_contacts_and_rotates() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed(&pool).await;

    // One pre-existing contact the search result must not duplicate.
    sqlx::query(
        "INSERT INTO contacts (id, name, linkedin_url_normalized)
         VALUES ('existing', 'Jane Doe', 'https://linkedin.com/in/jane')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let actor = StubActor::new(vec![Ok(vec![
        json!({"name": "Jane Doe", "url": "https://linkedin.com/in/jane", "position": "CEO"}),
        json!({"name": "New Person", "url": "https://linkedin.com/in/new", "position": "CEO",
               "email": "new@corp.com", "company": "NewCorp"}),
    ])]);

    let outcome = position_search::run_search(&pool, &actor, "ana", "Ana")
        .await
        .expect("run succeeds");
    match outcome {
        SearchRunOutcome::Inserted { count, .. } => assert_eq!(count, 1),
        other => panic!("expected insertion, got {other:?}"),
    }

    let from_search: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM contacts WHERE source = 'position_search'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(from_search, 1);

    // The used keyword went to the back of the rotation.
    let (used, unused): (i64, i64) = (
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM position_keywords WHERE last_used IS NOT NULL",
        )
        .fetch_one(&pool)
        .await
        .unwrap(),
        sqlx::query_scalar("SELECT COUNT(*) FROM position_keywords WHERE last_used IS NULL")
            .fetch_one(&pool)
            .await
            .unwrap(),
    );
    assert_eq!(used, 1);
    assert_eq!(unused, 1);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn rate_limit_emits_alert_blocks_week_and_turns_section_red() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed(&pool).await;

    let actor = StubActor::new(vec![Err(OutboundError::RateLimited {
        detail: "monthly usage hard limit exceeded".to_string(),
    })]);

    let outcome = position_search::run_search(&pool, &actor, "ana", "Ana")
        .await
        .expect("run returns an outcome");
    assert!(matches!(outcome, SearchRunOutcome::RateLimited));

    let open_alerts: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM alerts WHERE kind = 'rate_limit' AND resolved = FALSE",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(open_alerts, 1);

    // Further runs this week are blocked before touching the actor.
    let second = StubActor::new(vec![]);
    let outcome = position_search::run_search(&pool, &second, "ana", "Ana")
        .await
        .expect("second run");
    assert!(matches!(outcome, SearchRunOutcome::BlockedByAlert));

    // The alert drives the finder leaf and the section to red.
    let nodes = semaphore::compute(&pool).await.expect("semaphore");
    assert_eq!(nodes["prospect.position_search.ana"].status, Status::Red);
    assert_eq!(nodes["prospect.position_search"].status, Status::Red);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn semaphore_aggregates_cases_and_sections() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed(&pool).await;

    // One active ganados case with an overdue, unchecked column.
    sqlx::query(
        "INSERT INTO cases (id, name, stage, status, contact_ids)
         VALUES ('case-1', 'Launch', 'ganados', 'active', '[\"c1\"]')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO case_checklists (case_id, groups) VALUES ('case-1',
         '{\"g1\": {\"columns\": [{\"id\": \"col1\", \"title\": \"Kickoff\", \"due_date\": \"2000-01-01\"}], \"cells\": {}}}')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let nodes = semaphore::compute(&pool).await.expect("semaphore");
    assert_eq!(nodes["delivery.cases.case-1"].status, Status::Red);
    assert_eq!(nodes["delivery"].status, Status::Red);
    // Coming-soon leaves gray their section and the root.
    assert_eq!(nodes["prospect.hubspot_sync"].status, Status::Gray);
    assert_eq!(nodes["prospect"].status, Status::Gray);
    assert_eq!(nodes["overall"].status, Status::Gray);

    test_db.close().await.expect("failed to drop test database");
}
