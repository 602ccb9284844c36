//! Webinar reminder-email materialization.
//!
//! Every five minutes, look at events happening within the reminder window
//! and enqueue one reminder per registered attendee that has not already
//! been reminded for that event. Attendee lists can be supplemented from
//! the calendar adapter when the event has an external calendar entry;
//! calendar failures only lose the supplement, never the job.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::email_log;
use crate::outbound::CalendarClient;

const REMINDER_RULE: &str = "webinar_reminder";
/// Days before the event when reminders go out.
const REMINDER_WINDOW_DAYS: i32 = 3;

#[derive(Debug, sqlx::FromRow)]
struct UpcomingEvent {
    id: String,
    name: String,
    slug: Option<String>,
}

pub async fn materialize(
    pool: &PgPool,
    calendar: &dyn CalendarClient,
) -> Result<(), sqlx::Error> {
    let events: Vec<UpcomingEvent> = sqlx::query_as(
        "SELECT id, name, slug FROM webinar_events
         WHERE status IN ('active', 'published')
           AND webinar_date >= CURRENT_DATE
           AND webinar_date <= CURRENT_DATE + $1",
    )
    .bind(REMINDER_WINDOW_DAYS)
    .fetch_all(pool)
    .await?;

    for event in events {
        let mut recipients: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT email, contact_id FROM webinar_registrations
             WHERE event_id = $1 AND status = 'registered'",
        )
        .bind(&event.id)
        .fetch_all(pool)
        .await?;

        match calendar.attendee_emails(&event.id).await {
            Ok(extra) => {
                for email in extra {
                    if !recipients.iter().any(|(r, _)| r.eq_ignore_ascii_case(&email)) {
                        recipients.push((email, None));
                    }
                }
            }
            Err(e) => {
                log::warn!("calendar attendees unavailable for event {}: {}", event.id, e);
            }
        }

        let mut queued = 0usize;
        for (email, contact_id) in recipients {
            // One reminder per event per recipient.
            let already: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM email_logs
                 WHERE rule = $1 AND recipient = $2 AND subject LIKE '%' || $3 || '%'",
            )
            .bind(REMINDER_RULE)
            .bind(&email)
            .bind(&event.name)
            .fetch_one(pool)
            .await?;
            if already > 0 {
                continue;
            }

            let slug = event.slug.clone().unwrap_or_else(|| event.id.clone());
            let subject = format!("Reminder: {}", event.name);
            let html = format!(
                "<p>Your webinar <strong>{}</strong> is coming up.</p>\
                 <p><a href=\"/evento/{}\">Event details</a></p>",
                event.name, slug
            );

            email_log::enqueue(
                pool,
                &email,
                &subject,
                &html,
                &format!("Your webinar {} is coming up.", event.name),
                Some(REMINDER_RULE),
                contact_id.as_deref(),
            )
            .await?;

            // Stamp the cadence sentinel on the contact when we know it.
            if let Some(contact_id) = &contact_id {
                sqlx::query(
                    "UPDATE contacts
                     SET email_cadence = email_cadence || jsonb_build_object(
                         'last_email_webinar_reminder_sent', to_jsonb(NOW()),
                         'last_email_webinar_reminder_content', to_jsonb($1::text))
                     WHERE id = $2",
                )
                .bind(&subject)
                .bind(contact_id)
                .execute(pool)
                .await?;
            }

            queued += 1;
        }

        if queued > 0 {
            log::info!("event {}: queued {} reminder emails", event.id, queued);
        }
    }

    Ok(())
}
