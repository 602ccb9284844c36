//! Weekly status for current delivery cases ("ganados" projects).
//!
//! A project has a *pending task* when, for any contact on the case and any
//! live checklist column whose due date has arrived, the cell is unchecked
//! or does not exist at all. A missing cell counts as unchecked with the
//! column's due date, so a contact newly added to a case immediately
//! surfaces every overdue column.
//!
//! No pending tasks: green. Pending tasks with at least one cell checked
//! during the current ISO week: yellow (work is moving). Otherwise red.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rocket_db_pools::sqlx::types::Json;
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::{NodeStatus, Status};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistColumn {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Soft delete flag; deleted columns keep historical cells.
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistCell {
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChecklistGroup {
    #[serde(default)]
    pub columns: Vec<ChecklistColumn>,
    /// cells[contact_id][column_id]
    #[serde(default)]
    pub cells: HashMap<String, HashMap<String, ChecklistCell>>,
}

pub type Checklist = HashMap<String, ChecklistGroup>;

/// Pure weekly-status rule for one case.
pub fn case_weekly_status(
    contact_ids: &[String],
    checklist: &Checklist,
    today: NaiveDate,
) -> Status {
    let mut pending = false;
    let mut checked_this_week = false;
    let iso_week = (today.iso_week().year(), today.iso_week().week());

    for group in checklist.values() {
        for column in group.columns.iter().filter(|c| !c.deleted) {
            let Some(due) = column.due_date else {
                continue;
            };
            if due > today {
                continue;
            }
            for contact_id in contact_ids {
                let cell = group.cells.get(contact_id).and_then(|c| c.get(&column.id));
                match cell {
                    Some(cell) if cell.checked => {}
                    // Unchecked or missing entirely: both are pending.
                    _ => pending = true,
                }
            }
        }

        for cells in group.cells.values() {
            for cell in cells.values() {
                if let Some(at) = cell.checked_at {
                    let week = at.date_naive().iso_week();
                    if cell.checked && (week.year(), week.week()) == iso_week {
                        checked_this_week = true;
                    }
                }
            }
        }
    }

    if !pending {
        Status::Green
    } else if checked_this_week {
        Status::Yellow
    } else {
        Status::Red
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ActiveCase {
    id: String,
    name: String,
    contact_ids: Json<Vec<String>>,
}

/// Status per active "ganados" case, keyed by case id.
pub async fn current_cases_status(
    pool: &PgPool,
) -> Result<Vec<(String, NodeStatus)>, sqlx::Error> {
    let cases: Vec<ActiveCase> = sqlx::query_as(
        "SELECT id, name, contact_ids FROM cases
         WHERE stage = 'ganados' AND status = 'active'
         ORDER BY created_at",
    )
    .fetch_all(pool)
    .await?;

    let today = Utc::now().date_naive();
    let mut out = Vec::with_capacity(cases.len());

    for case in cases {
        let checklist: Option<(Json<Checklist>,)> =
            sqlx::query_as("SELECT groups FROM case_checklists WHERE case_id = $1")
                .bind(&case.id)
                .fetch_optional(pool)
                .await?;

        let checklist = checklist.map(|(json,)| json.0).unwrap_or_default();
        let status = case_weekly_status(&case.contact_ids.0, &checklist, today);

        out.push((
            case.id.clone(),
            NodeStatus {
                status,
                metadata: json!({"name": case.name, "contacts": case.contact_ids.0.len()}),
            },
        ));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn column(id: &str, due: Option<NaiveDate>, deleted: bool) -> ChecklistColumn {
        ChecklistColumn {
            id: id.to_string(),
            title: id.to_string(),
            due_date: due,
            deleted,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn checklist(group: ChecklistGroup) -> Checklist {
        let mut map = HashMap::new();
        map.insert("g1".to_string(), group);
        map
    }

    #[test]
    fn no_due_columns_is_green() {
        let group = ChecklistGroup {
            columns: vec![column("c1", None, false)],
            cells: HashMap::new(),
        };
        let status = case_weekly_status(
            &["a".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Green);
    }

    #[test]
    fn missing_cell_for_due_column_is_pending() {
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 2, 10)), false)],
            cells: HashMap::new(),
        };
        let status = case_weekly_status(
            &["a".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Red);
    }

    #[test]
    fn deleted_columns_are_ignored() {
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 2, 10)), true)],
            cells: HashMap::new(),
        };
        let status = case_weekly_status(
            &["a".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Green);
    }

    #[test]
    fn future_due_dates_are_not_pending() {
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 3, 1)), false)],
            cells: HashMap::new(),
        };
        let status = case_weekly_status(
            &["a".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Green);
    }

    #[test]
    fn checked_cells_clear_pending() {
        let mut cells = HashMap::new();
        let mut row = HashMap::new();
        row.insert(
            "c1".to_string(),
            ChecklistCell {
                checked: true,
                checked_at: Some(Utc.with_ymd_and_hms(2026, 2, 1, 10, 0, 0).unwrap()),
            },
        );
        cells.insert("a".to_string(), row);
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 2, 10)), false)],
            cells,
        };
        let status = case_weekly_status(
            &["a".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Green);
    }

    #[test]
    fn pending_with_recent_check_is_yellow() {
        // Contact "a" checked this week; contact "b" still has the column open.
        let mut cells = HashMap::new();
        let mut row = HashMap::new();
        row.insert(
            "c1".to_string(),
            ChecklistCell {
                checked: true,
                // 2026-02-11 is a Wednesday; the 9th is the same ISO week.
                checked_at: Some(Utc.with_ymd_and_hms(2026, 2, 9, 10, 0, 0).unwrap()),
            },
        );
        cells.insert("a".to_string(), row);
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 2, 10)), false)],
            cells,
        };
        let status = case_weekly_status(
            &["a".to_string(), "b".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Yellow);
    }

    #[test]
    fn pending_with_stale_checks_is_red() {
        let mut cells = HashMap::new();
        let mut row = HashMap::new();
        row.insert(
            "c1".to_string(),
            ChecklistCell {
                checked: true,
                checked_at: Some(Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap()),
            },
        );
        cells.insert("a".to_string(), row);
        let group = ChecklistGroup {
            columns: vec![column("c1", Some(date(2026, 2, 10)), false)],
            cells,
        };
        let status = case_weekly_status(
            &["a".to_string(), "b".to_string()],
            &checklist(group),
            date(2026, 2, 11),
        );
        assert_eq!(status, Status::Red);
    }
}
