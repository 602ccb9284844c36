//! Retention sweep: the relational stand-in for TTL indexes.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::config::AUDIT_TTL_DAYS;
use crate::imports::{audit, locks};

pub async fn sweep(pool: &PgPool) -> Result<(), sqlx::Error> {
    let audit_rows = audit::sweep_expired(pool, AUDIT_TTL_DAYS).await?;
    let lock_rows = locks::sweep_expired(pool).await?;

    if audit_rows > 0 || lock_rows > 0 {
        log::info!(
            "retention sweep: removed {} audit rows, {} expired locks",
            audit_rows,
            lock_rows
        );
    }
    Ok(())
}
