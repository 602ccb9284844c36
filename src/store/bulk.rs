//! Ordered and unordered bulk-write primitives.
//!
//! Two flavors, mirroring the two failure policies the pipeline needs:
//!
//! - [`ordered`] runs every operation inside one transaction and aborts on
//!   the first error. Used for single-row critical updates where partial
//!   application would corrupt state.
//! - [`unordered`] runs every operation on one connection, records per-op
//!   errors, and keeps going. Used for every batch write in the import main
//!   pass and reclassification, where row independence makes partial
//!   failure recoverable.
//!
//! Operations are boxed closures over a `PgConnection` so call sites can
//! mix statement shapes inside one batch.

use rocket_db_pools::sqlx::{self, Acquire, PgConnection, PgPool};
use std::future::Future;
use std::pin::Pin;

pub type OpFuture<'c> = Pin<Box<dyn Future<Output = Result<u64, sqlx::Error>> + Send + 'c>>;

/// One prepared bulk operation. Returns the rows affected.
pub type BulkOp = Box<dyn for<'c> FnOnce(&'c mut PgConnection) -> OpFuture<'c> + Send>;

/// Convenience constructor so call sites avoid spelling the boxed type.
pub fn op<F>(f: F) -> BulkOp
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> OpFuture<'c> + Send + 'static,
{
    Box::new(f)
}

/// Error captured for a single operation inside an unordered batch.
#[derive(Debug, Clone)]
pub struct BulkOpError {
    pub index: usize,
    pub message: String,
}

/// Outcome of an unordered batch: per-op rows affected or error.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub results: Vec<Result<u64, BulkOpError>>,
}

impl BulkReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &BulkOpError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// Rows affected by the op at `index`, or None if it failed.
    pub fn rows_affected(&self, index: usize) -> Option<u64> {
        self.results.get(index).and_then(|r| r.as_ref().ok().copied())
    }
}

/// Execute all operations in one transaction; stop at the first error.
pub async fn ordered(pool: &PgPool, ops: Vec<BulkOp>) -> Result<u64, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    let mut total = 0;
    for operation in ops {
        total += operation(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(total)
}

/// Execute all operations on one connection; record errors and continue.
///
/// Only connection acquisition itself is fatal. Individual operation
/// failures land in the report for the caller to log and count.
pub async fn unordered(pool: &PgPool, ops: Vec<BulkOp>) -> Result<BulkReport, sqlx::Error> {
    let mut conn = pool.acquire().await?;

    let mut report = BulkReport::default();
    for (index, operation) in ops.into_iter().enumerate() {
        match operation(&mut *conn).await {
            Ok(rows) => report.results.push(Ok(rows)),
            Err(e) => report.results.push(Err(BulkOpError {
                index,
                message: e.to_string(),
            })),
        }
    }

    Ok(report)
}
