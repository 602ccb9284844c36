use focus_server::test_support::{TestDatabase, TestDatabaseError};
use rocket_db_pools::sqlx;

async fn provision() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Container(err)) => {
            eprintln!("skipping migration test: no container runtime ({err})");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

#[tokio::test]
async fn migrations_create_core_tables() {
    let Some(test_db) = provision().await else {
        return;
    };
    let pool = test_db.pool_clone();

    for table in [
        "contacts",
        "companies",
        "import_jobs",
        "import_locks",
        "import_conflicts",
        "import_invalid_rows",
        "import_parse_failures",
        "import_tasks",
        "job_keywords",
        "buyer_persona_priorities",
        "position_keywords",
        "search_schedules",
        "cases",
        "case_checklists",
        "case_contact_roles",
        "alerts",
        "notifications",
        "newsletters",
        "email_logs",
        "reclassification_jobs",
        "classifier_metrics",
        "merge_candidates_cache",
    ] {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'public' AND table_name = $1",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .expect("lookup succeeded");
        assert_eq!(count, 1, "table {table} should exist after migrations");
    }

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let Some(test_db) = provision().await else {
        return;
    };

    test_db.reset().await.expect("second run is a no-op");

    let unique_indexes: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pg_indexes
         WHERE schemaname = 'public' AND indexname = 'companies_normalized_name_key'",
    )
    .fetch_one(test_db.pool())
    .await
    .expect("lookup succeeded");
    assert_eq!(unique_indexes, 1);

    test_db.close().await.expect("failed to drop test database");
}
