//! Outbound email queue.
//!
//! The core never sends mail on its own paths; it enqueues rows here and an
//! external sender drains them through the `Mailer` seam.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::store::new_id;

/// Queue one email. Returns the log row id.
pub async fn enqueue(
    pool: &PgPool,
    recipient: &str,
    subject: &str,
    html: &str,
    text: &str,
    rule: Option<&str>,
    contact_id: Option<&str>,
) -> Result<String, sqlx::Error> {
    let id = new_id();
    sqlx::query(
        "INSERT INTO email_logs (id, recipient, subject, html, text, rule, contact_id)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&id)
    .bind(recipient)
    .bind(subject)
    .bind(html)
    .bind(text)
    .bind(rule)
    .bind(contact_id)
    .execute(pool)
    .await?;
    Ok(id)
}

/// Count of rows still waiting for the external sender.
pub async fn queued_count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM email_logs WHERE status = 'queued'")
        .fetch_one(pool)
        .await
}
