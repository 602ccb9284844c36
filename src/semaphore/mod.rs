//! Section-wide traffic-light aggregator.
//!
//! Computes a status for every node of a fixed tree and aggregates upward
//! with strict priority **gray > red > yellow > green**: any gray child
//! grays the parent, else any red child reddens it, else any yellow child
//! yellows it, else the parent is green. The result is a flat
//! `node_id -> {status, metadata}` map the front-end renders directly.
//!
//! Leaf kinds:
//!
//! - *coming-soon*: feature not shipped, always gray;
//! - *weekly-counter*: green at goal, yellow in between, red at zero;
//! - *external-dependency*: red while an unresolved rate-limit alert exists
//!   for the current ISO week, regardless of counters;
//! - *data-presence*: green when a collection is non-empty and recent;
//! - *current cases*: per-project checklist rule (see [`cases`]).

pub mod cases;

use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

use crate::alerts;
use crate::classifier::keywords::list_priorities;
use crate::config::{WEEKLY_GOAL_PER_FINDER, WEEKLY_GOAL_TOTAL};
use crate::imports::PROFILES;
use crate::position_search;
use crate::week::current_week_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Gray,
    Red,
    Yellow,
    Green,
}

impl Status {
    /// Priority rank for aggregation; lower dominates.
    fn rank(self) -> u8 {
        match self {
            Self::Gray => 0,
            Self::Red => 1,
            Self::Yellow => 2,
            Self::Green => 3,
        }
    }
}

/// Aggregate children with gray > red > yellow > green. No children means
/// nothing is wrong: green.
pub fn aggregate(children: impl IntoIterator<Item = Status>) -> Status {
    children
        .into_iter()
        .min_by_key(|s| s.rank())
        .unwrap_or(Status::Green)
}

/// Weekly-counter rule: green at goal, yellow under it, red at zero.
pub fn counter_status(counter: i64, goal: i64) -> Status {
    if counter >= goal {
        Status::Green
    } else if counter > 0 {
        Status::Yellow
    } else {
        Status::Red
    }
}

/// One node's computed state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeStatus {
    pub status: Status,
    pub metadata: Value,
}

impl NodeStatus {
    fn new(status: Status, metadata: Value) -> Self {
        Self { status, metadata }
    }

    fn bare(status: Status) -> Self {
        Self {
            status,
            metadata: Value::Null,
        }
    }
}

/// Compute the whole tree for the current week.
pub async fn compute(pool: &PgPool) -> Result<HashMap<String, NodeStatus>, sqlx::Error> {
    let mut nodes: HashMap<String, NodeStatus> = HashMap::new();
    let week = current_week_key();

    // --- prospect: LinkedIn imports, one leaf per profile -----------------
    let mut import_statuses = Vec::new();
    for (profile, display_name) in PROFILES {
        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_tasks
             WHERE profile = $1 AND import_completed = TRUE
               AND week_start = date_trunc('week', CURRENT_DATE)::date",
        )
        .bind(profile)
        .fetch_one(pool)
        .await?;

        let in_flight: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM import_jobs
             WHERE profile = $1 AND status IN ('uploaded', 'processing', 'pending_retry')",
        )
        .bind(profile)
        .fetch_one(pool)
        .await?;

        let status = if completed > 0 {
            Status::Green
        } else if in_flight > 0 {
            Status::Yellow
        } else {
            Status::Red
        };
        import_statuses.push(status);
        nodes.insert(
            format!("prospect.import.{}", profile.to_lowercase()),
            NodeStatus::new(status, json!({"profile": profile, "name": display_name})),
        );
    }
    nodes.insert(
        "prospect.import".to_string(),
        NodeStatus::bare(aggregate(import_statuses)),
    );

    // --- prospect: position-search finders, one leaf per ranked persona ---
    let personas = list_priorities(pool).await?;
    let mut finder_statuses = Vec::new();
    for (persona_id, persona_name, _) in personas.iter().take(3) {
        let counter = position_search::weekly_count(pool, persona_id).await?;
        let rate_limited =
            alerts::has_open(pool, alerts::KIND_RATE_LIMIT, &week, Some(persona_id.as_str()))
                .await?;

        // External dependency overrides the counter entirely.
        let status = if rate_limited {
            Status::Red
        } else {
            counter_status(counter, WEEKLY_GOAL_PER_FINDER)
        };
        finder_statuses.push(status);
        nodes.insert(
            format!("prospect.position_search.{}", persona_id),
            NodeStatus::new(
                status,
                json!({
                    "persona": persona_name,
                    "counter": counter,
                    "goal": WEEKLY_GOAL_PER_FINDER,
                    "rate_limited": rate_limited,
                }),
            ),
        );
    }

    let total = position_search::weekly_total(pool).await?;
    let section_rate_limited =
        alerts::has_open(pool, alerts::KIND_RATE_LIMIT, &week, None).await?;
    let section_status = if section_rate_limited {
        Status::Red
    } else {
        aggregate(
            finder_statuses
                .iter()
                .copied()
                .chain([counter_status(total, WEEKLY_GOAL_TOTAL)]),
        )
    };
    nodes.insert(
        "prospect.position_search".to_string(),
        NodeStatus::new(
            section_status,
            json!({"counter": total, "goal": WEEKLY_GOAL_TOTAL, "rate_limited": section_rate_limited}),
        ),
    );

    // --- prospect: not-yet-shipped integrations -------------------------
    nodes.insert(
        "prospect.hubspot_sync".to_string(),
        NodeStatus::new(Status::Gray, json!({"coming_soon": true})),
    );

    let prospect_status = aggregate(
        ["prospect.import", "prospect.position_search", "prospect.hubspot_sync"]
            .iter()
            .map(|id| nodes[*id].status),
    );
    nodes.insert("prospect".to_string(), NodeStatus::bare(prospect_status));

    // --- content: data-presence leaves -----------------------------------
    let recent_newsletters: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM newsletters
         WHERE status = 'sent' AND sent_at >= NOW() - INTERVAL '14 days'",
    )
    .fetch_one(pool)
    .await?;
    let any_newsletters: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM newsletters")
        .fetch_one(pool)
        .await?;
    let newsletters_status = if recent_newsletters > 0 {
        Status::Green
    } else if any_newsletters > 0 {
        Status::Yellow
    } else {
        Status::Red
    };
    nodes.insert(
        "content.newsletters".to_string(),
        NodeStatus::new(newsletters_status, json!({"recent": recent_newsletters})),
    );

    let upcoming_webinars: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webinar_events
         WHERE status IN ('active', 'published') AND webinar_date >= CURRENT_DATE",
    )
    .fetch_one(pool)
    .await?;
    nodes.insert(
        "content.webinars".to_string(),
        NodeStatus::new(
            if upcoming_webinars > 0 { Status::Green } else { Status::Red },
            json!({"upcoming": upcoming_webinars}),
        ),
    );

    let content_status = aggregate(
        ["content.newsletters", "content.webinars"]
            .iter()
            .map(|id| nodes[*id].status),
    );
    nodes.insert("content".to_string(), NodeStatus::bare(content_status));

    // --- delivery: current cases -----------------------------------------
    let case_nodes = cases::current_cases_status(pool).await?;
    let delivery_status = aggregate(case_nodes.iter().map(|(_, node)| node.status));
    for (case_id, node) in case_nodes {
        nodes.insert(format!("delivery.cases.{}", case_id), node);
    }
    nodes.insert("delivery.cases".to_string(), NodeStatus::bare(delivery_status));
    nodes.insert("delivery".to_string(), NodeStatus::bare(delivery_status));

    // --- root -------------------------------------------------------------
    let overall = aggregate(
        ["prospect", "content", "delivery"].iter().map(|id| nodes[*id].status),
    );
    nodes.insert("overall".to_string(), NodeStatus::bare(overall));

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_priority() {
        use Status::*;
        assert_eq!(aggregate([Green, Green]), Green);
        assert_eq!(aggregate([Green, Yellow]), Yellow);
        assert_eq!(aggregate([Yellow, Red, Green]), Red);
        assert_eq!(aggregate([Red, Gray, Green]), Gray);
        assert_eq!(aggregate([]), Green);
    }

    #[test]
    fn counter_rule() {
        assert_eq!(counter_status(0, 50), Status::Red);
        assert_eq!(counter_status(1, 50), Status::Yellow);
        assert_eq!(counter_status(49, 50), Status::Yellow);
        assert_eq!(counter_status(50, 50), Status::Green);
        assert_eq!(counter_status(80, 50), Status::Green);
    }
}
