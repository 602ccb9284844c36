//! Week arithmetic shared by imports, quotas, and the semaphore.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

/// ISO date of Monday 00:00 UTC for the week containing `now`.
pub fn week_start(now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// ISO date of Monday for the current week.
pub fn current_week_start() -> NaiveDate {
    week_start(Utc::now())
}

/// Week key in `YYYY-Www` form, used to scope alerts and quotas.
pub fn week_key(now: DateTime<Utc>) -> String {
    let iso = now.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

pub fn current_week_key() -> String {
    week_key(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn week_start_is_monday() {
        // 2026-02-11 is a Wednesday
        let now = Utc.with_ymd_and_hms(2026, 2, 11, 15, 30, 0).unwrap();
        assert_eq!(
            week_start(now),
            NaiveDate::from_ymd_opt(2026, 2, 9).unwrap()
        );
    }

    #[test]
    fn week_start_of_monday_is_itself() {
        let now = Utc.with_ymd_and_hms(2026, 2, 9, 0, 0, 0).unwrap();
        assert_eq!(
            week_start(now),
            NaiveDate::from_ymd_opt(2026, 2, 9).unwrap()
        );
    }

    #[test]
    fn week_key_uses_iso_week_year() {
        // 2026-01-01 falls in ISO week 2026-W01
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(week_key(now), "2026-W01");
    }
}
