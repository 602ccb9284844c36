//! Store-level primitives shared by every persistence path.
//!
//! The store owns all persisted documents. Schema and indexes are
//! bootstrapped at startup by the sqlx migrator (see `migrations/`); bulk
//! write primitives live in [`bulk`]. Retention windows that a document
//! store would express as TTL indexes are enforced by the scheduler's
//! retention sweep, with lock expiry additionally checked at acquisition
//! time so correctness never depends on sweep timing.

pub mod bulk;

use rocket_db_pools::sqlx::{self, PgPool};
use uuid::Uuid;

/// Opaque string id used for every document-style row.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run startup migrations (idempotent).
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
    MIGRATOR.run(pool).await
}
