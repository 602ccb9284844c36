//! Keyword ownership and cache-generation behavior against a live store.

use focus_server::classifier::keywords::{self, InsertAction, KeywordError};
use focus_server::classifier::{PersonaClassifier, reclassification};
use focus_server::test_support::{TestDatabase, TestDatabaseError};
use rocket_db_pools::sqlx::{self, PgPool};

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping classifier test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn seed_priorities(pool: &PgPool) {
    for (id, name, priority) in [("ana", "Ana", 1), ("luis", "Luis", 2)] {
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
}

#[tokio::test]
async fn keyword_ownership_follows_priority() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_priorities(&pool).await;

    let classifier = PersonaClassifier::new(pool.clone());

    // Luis (priority 2) claims the keyword first.
    let action = keywords::insert_keyword(&classifier, &pool, "Director", "luis", "Luis")
        .await
        .expect("insert succeeds");
    assert_eq!(action, InsertAction::Created);

    // A lower-priority persona cannot take it; the cache stays untouched.
    let generation_before = classifier.cache().generation();
    let err = keywords::insert_keyword(&classifier, &pool, "director", "nadie", "Nadie")
        .await
        .expect_err("insert rejected");
    assert!(matches!(err, KeywordError::OwnedByHigherPriority { .. }));
    assert_eq!(classifier.cache().generation(), generation_before);

    let (owner,): (String,) =
        sqlx::query_as("SELECT buyer_persona_id FROM job_keywords WHERE keyword = 'director'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(owner, "luis");

    // Ana (priority 1) takes ownership and bumps the generation.
    let action = keywords::insert_keyword(&classifier, &pool, "director", "ana", "Ana")
        .await
        .expect("replacement succeeds");
    assert_eq!(action, InsertAction::Replaced);
    assert_eq!(classifier.cache().generation(), generation_before + 1);

    let (owner,): (String,) =
        sqlx::query_as("SELECT buyer_persona_id FROM job_keywords WHERE keyword = 'director'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(owner, "ana");

    // The classifier sees the new owner immediately.
    let classification = classifier.classify("Medical Director").await.expect("classify");
    assert_eq!(classification.buyer_persona_id, "ana");
    assert!(!classification.is_default);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn bulk_insert_counts_outcomes_per_keyword() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_priorities(&pool).await;

    let classifier = PersonaClassifier::new(pool.clone());

    keywords::insert_keyword(&classifier, &pool, "ventas", "ana", "Ana")
        .await
        .expect("seed keyword");

    let outcome = keywords::insert_keywords_bulk(
        &classifier,
        &pool,
        "ventas, gerente\ncomercial",
        "luis",
        "Luis",
    )
    .await
    .expect("bulk insert");

    assert_eq!(outcome.total_input, 3);
    assert_eq!(outcome.created, 2);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.replaced, 0);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn reclassification_skips_locked_and_is_idempotent() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();
    seed_priorities(&pool).await;

    let classifier = PersonaClassifier::new(pool.clone());
    keywords::insert_keyword(&classifier, &pool, "ceo", "ana", "Ana")
        .await
        .expect("seed keyword");

    sqlx::query(
        "INSERT INTO contacts (id, name, job_title, buyer_persona, persona_locked) VALUES
             ('c1', 'Jane', 'CEO', NULL, FALSE),
             ('c2', 'John', 'CEO', 'luis', TRUE),
             ('c3', 'Mia', 'Accountant', NULL, FALSE)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let job_id = reclassification::enqueue(&pool, serde_json::json!({}))
        .await
        .expect("enqueue");
    let ran = reclassification::drain_one(&pool, &classifier)
        .await
        .expect("drain");
    assert_eq!(ran.as_deref(), Some(job_id.as_str()));

    let (c1, c2, c3): ((String,), (String,), (String,)) = (
        sqlx::query_as("SELECT COALESCE(buyer_persona, '') FROM contacts WHERE id = 'c1'")
            .fetch_one(&pool)
            .await
            .unwrap(),
        sqlx::query_as("SELECT COALESCE(buyer_persona, '') FROM contacts WHERE id = 'c2'")
            .fetch_one(&pool)
            .await
            .unwrap(),
        sqlx::query_as("SELECT COALESCE(buyer_persona, '') FROM contacts WHERE id = 'c3'")
            .fetch_one(&pool)
            .await
            .unwrap(),
    );
    assert_eq!(c1.0, "ana");
    assert_eq!(c2.0, "luis", "persona_locked contacts are never rewritten");
    assert_eq!(c3.0, "mateo", "no match falls back to the default persona");

    // Second sweep with no dictionary change: a no-op.
    reclassification::enqueue(&pool, serde_json::json!({}))
        .await
        .expect("enqueue again");
    reclassification::drain_one(&pool, &classifier)
        .await
        .expect("drain again");

    let (updated,): (i32,) = sqlx::query_as(
        "SELECT updated FROM reclassification_jobs ORDER BY created_at DESC LIMIT 1",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(updated, 0, "second run should change nothing");

    test_db.close().await.expect("failed to drop test database");
}
