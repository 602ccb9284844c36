//! Periodic job driver.
//!
//! One tokio task per registered job, each on its own interval with
//! missed-tick skipping, which gives every job `max_instances = 1`
//! semantics: a tick that fires while the previous body is still running
//! is dropped, never queued.
//!
//! | Job | Interval |
//! |---|---|
//! | import dispatch (orphan recovery + claim + process) | 10 s |
//! | reclassification drain | 30 s |
//! | due scheduled searches | 1 h |
//! | scheduled newsletters | 15 m |
//! | webinar reminder materialization | 5 m |
//! | Monday auto-newsletters (guarded, Monday 09:00 UTC) | 1 h |
//! | merge-candidates cache refresh (guarded, 03:00 UTC) | 1 h |
//! | classifier metrics snapshot | 6 h |
//! | retention sweep | 6 h |
//!
//! A job body that returns an error is logged and surfaced as a
//! `schedule_failure` notification; the scheduler itself never dies.

pub mod merge_cache;
pub mod newsletters;
pub mod retention;
pub mod schedules;
pub mod webinar_emails;

use rocket_db_pools::sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::classifier::{PersonaClassifier, metrics, reclassification};
use crate::imports::worker::ImportWorker;
use crate::notifications;
use crate::outbound::Collaborators;

/// Shared handles every periodic job can reach.
pub struct SchedulerContext {
    pub pool: PgPool,
    pub classifier: PersonaClassifier,
    pub collaborators: Collaborators,
}

/// Spawn all periodic jobs. The returned token stops them on cancel.
pub fn spawn(ctx: SchedulerContext) -> CancellationToken {
    let token = CancellationToken::new();
    let ctx = Arc::new(ctx);

    let worker = Arc::new(ImportWorker::new(ctx.pool.clone(), ctx.classifier.clone()));

    {
        let worker = Arc::clone(&worker);
        let pool = ctx.pool.clone();
        spawn_job("import_dispatch", Duration::from_secs(10), token.clone(), pool, move || {
            let worker = Arc::clone(&worker);
            async move {
                worker.tick().await.map(|_| ()).map_err(|e| e.to_string())
            }
        });
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "reclassification_drain",
            Duration::from_secs(30),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move {
                    reclassification::drain_one(&ctx.pool, &ctx.classifier)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job("due_schedules", Duration::from_secs(3600), token.clone(), ctx.pool.clone(), move || {
            let ctx = Arc::clone(&ctx);
            async move { schedules::process_due(&ctx).await.map_err(|e| e.to_string()) }
        });
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "scheduled_newsletters",
            Duration::from_secs(900),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move {
                    newsletters::process_scheduled(&ctx.pool)
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "webinar_emails",
            Duration::from_secs(300),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move {
                    webinar_emails::materialize(&ctx.pool, ctx.collaborators.calendar.as_ref())
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "auto_newsletters_monday",
            Duration::from_secs(3600),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move {
                    newsletters::process_monday_auto(&ctx.pool, ctx.collaborators.llm.as_ref())
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "merge_candidates_refresh",
            Duration::from_secs(3600),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move {
                    merge_cache::refresh_if_due(&ctx.pool)
                        .await
                        .map_err(|e| e.to_string())
                }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "classifier_metrics",
            Duration::from_secs(6 * 3600),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move { metrics::snapshot(&ctx.pool).await.map(|_| ()).map_err(|e| e.to_string()) }
            },
        );
    }

    {
        let ctx = Arc::clone(&ctx);
        spawn_job(
            "retention_sweep",
            Duration::from_secs(6 * 3600),
            token.clone(),
            ctx.pool.clone(),
            move || {
                let ctx = Arc::clone(&ctx);
                async move { retention::sweep(&ctx.pool).await.map_err(|e| e.to_string()) }
            },
        );
    }

    log::info!("scheduler started");
    token
}

/// Run `job` every `period` until the token is cancelled. Errors become
/// `schedule_failure` notifications; panics cannot escape the task.
fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    pool: PgPool,
    job: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // A tick arriving while the previous body runs is skipped, not
        // queued: one instance per job id, ever.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    log::info!("scheduler job {} stopped", name);
                    return;
                }
                _ = ticker.tick() => {}
            }

            if let Err(error) = job().await {
                log::error!("scheduler job {} failed: {}", name, error);
                if let Err(e) =
                    notifications::schedule_failure(&pool, None, name, name, Some(&error)).await
                {
                    log::error!("could not record schedule failure for {}: {}", name, e);
                }
            }
        }
    });
}
