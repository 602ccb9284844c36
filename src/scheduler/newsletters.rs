//! Newsletter dispatch: scheduled sends and Monday auto-generation.
//!
//! Sending means enqueuing one `email_logs` row per subscriber; the
//! external sender drains the queue. The Monday job generates content
//! through the LLM adapter for every enabled auto-config, guarded so a
//! config never fires twice in one week.

use chrono::{Datelike, Timelike, Utc, Weekday};
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use serde_json::Value;

use crate::email_log;
use crate::outbound::LlmClient;
use crate::store::new_id;

#[derive(Debug, sqlx::FromRow)]
struct DueNewsletter {
    id: String,
    name: String,
    subject: String,
    content_html: String,
    thematic_area: Option<String>,
}

/// Enqueue every newsletter whose `scheduled_at` has arrived.
pub async fn process_scheduled(pool: &PgPool) -> Result<(), sqlx::Error> {
    let due: Vec<DueNewsletter> = sqlx::query_as(
        "SELECT id, name, subject, content_html, thematic_area
         FROM newsletters
         WHERE status = 'scheduled' AND scheduled_at <= NOW()
         ORDER BY scheduled_at
         LIMIT 100",
    )
    .fetch_all(pool)
    .await?;

    for newsletter in due {
        match enqueue_for_subscribers(pool, &newsletter).await {
            Ok(recipients) => {
                sqlx::query(
                    "UPDATE newsletters
                     SET status = 'sent', sent_at = NOW(), recipients_count = $1, updated_at = NOW()
                     WHERE id = $2",
                )
                .bind(recipients as i32)
                .bind(&newsletter.id)
                .execute(pool)
                .await?;
                log::info!(
                    "newsletter {} ({}) queued for {} recipients",
                    newsletter.id,
                    newsletter.name,
                    recipients
                );
            }
            Err(e) => {
                log::error!("newsletter {} failed: {}", newsletter.id, e);
                sqlx::query(
                    "UPDATE newsletters
                     SET status = 'failed', error = $1, updated_at = NOW()
                     WHERE id = $2",
                )
                .bind(e.to_string())
                .bind(&newsletter.id)
                .execute(pool)
                .await?;
            }
        }
    }

    Ok(())
}

async fn enqueue_for_subscribers(
    pool: &PgPool,
    newsletter: &DueNewsletter,
) -> Result<usize, sqlx::Error> {
    let subscribers: Vec<(String, Json<Value>)> = sqlx::query_as(
        "SELECT email, thematic_areas FROM newsletter_subscribers WHERE unsubscribed = FALSE",
    )
    .fetch_all(pool)
    .await?;

    let mut recipients = 0usize;
    for (email, areas) in subscribers {
        if let Some(area) = &newsletter.thematic_area {
            let subscribed = areas
                .0
                .as_array()
                .map(|list| list.iter().any(|v| v.as_str() == Some(area.as_str())))
                .unwrap_or(false);
            if !subscribed {
                continue;
            }
        }

        email_log::enqueue(
            pool,
            &email,
            &newsletter.subject,
            &newsletter.content_html,
            "",
            Some("newsletter"),
            None,
        )
        .await?;
        recipients += 1;
    }

    Ok(recipients)
}

#[derive(Debug, sqlx::FromRow)]
struct AutoConfig {
    id: String,
    thematic_axis_id: String,
    thematic_axis_name: String,
}

/// Monday-morning auto-generation. Runs inside an hourly tick; the weekday
/// and hour guard plus the `last_sent` check make it fire once per week.
pub async fn process_monday_auto(
    pool: &PgPool,
    llm: &dyn LlmClient,
) -> Result<(), sqlx::Error> {
    let now = Utc::now();
    if now.weekday() != Weekday::Mon || now.hour() != 9 {
        return Ok(());
    }

    let configs: Vec<AutoConfig> = sqlx::query_as(
        "SELECT id, thematic_axis_id, thematic_axis_name
         FROM newsletter_auto_configs
         WHERE enabled = TRUE AND day_of_week = 0
           AND (last_sent IS NULL OR last_sent < NOW() - INTERVAL '6 days')",
    )
    .fetch_all(pool)
    .await?;

    log::info!("{} auto-newsletter configs due", configs.len());

    for config in configs {
        let prompt = format!(
            "Write a short weekly newsletter in Spanish for the thematic area \
             '{}'. Return HTML only: a heading, two short paragraphs and a \
             closing line. No preamble.",
            config.thematic_axis_name
        );

        let html = match llm.send(&prompt).await {
            Ok(html) => html,
            Err(e) => {
                log::error!(
                    "auto-newsletter content generation failed for {}: {}",
                    config.thematic_axis_name,
                    e
                );
                continue;
            }
        };

        let newsletter_id = new_id();
        sqlx::query(
            "INSERT INTO newsletters
                 (id, name, subject, content_html, thematic_area, status, scheduled_at, auto_generated)
             VALUES ($1, $2, $3, $4, $5, 'scheduled', NOW(), TRUE)",
        )
        .bind(&newsletter_id)
        .bind(format!(
            "Weekly {} - {}",
            config.thematic_axis_name,
            now.format("%Y-%m-%d")
        ))
        .bind(format!("Weekly update: {}", config.thematic_axis_name))
        .bind(&html)
        .bind(&config.thematic_axis_id)
        .execute(pool)
        .await?;

        sqlx::query("UPDATE newsletter_auto_configs SET last_sent = NOW() WHERE id = $1")
            .bind(&config.id)
            .execute(pool)
            .await?;

        log::info!(
            "auto-newsletter {} created for {}",
            newsletter_id,
            config.thematic_axis_name
        );
    }

    Ok(())
}
