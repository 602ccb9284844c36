//! Parsing of the `connected_on` date column.
//!
//! LinkedIn exports write these as `<day> <month> <year>` with the month as
//! a 3-letter abbreviation or a full name, in English or Spanish depending
//! on the account locale, with assorted separators. Anything outside that
//! grammar is a parse failure; the field is left absent and an audit row is
//! emitted by the caller.

use chrono::NaiveDate;

fn month_number(token: &str) -> Option<u32> {
    // Full names first, then the 3-letter prefix.
    let full = match token {
        "enero" => Some(1),
        "febrero" => Some(2),
        "marzo" => Some(3),
        "abril" => Some(4),
        "mayo" => Some(5),
        "junio" => Some(6),
        "julio" => Some(7),
        "agosto" => Some(8),
        "septiembre" => Some(9),
        "octubre" => Some(10),
        "noviembre" => Some(11),
        "diciembre" => Some(12),
        "january" => Some(1),
        "february" => Some(2),
        "march" => Some(3),
        "april" => Some(4),
        "june" => Some(6),
        "july" => Some(7),
        "august" => Some(8),
        "september" => Some(9),
        "october" => Some(10),
        "november" => Some(11),
        "december" => Some(12),
        _ => None,
    };
    if full.is_some() {
        return full;
    }

    let prefix: String = token.chars().take(3).collect();
    match prefix.as_str() {
        "jan" | "ene" => Some(1),
        "feb" => Some(2),
        "mar" => Some(3),
        "apr" | "abr" => Some(4),
        "may" => Some(5),
        "jun" => Some(6),
        "jul" => Some(7),
        "aug" | "ago" => Some(8),
        "sep" => Some(9),
        "oct" => Some(10),
        "nov" => Some(11),
        "dec" | "dic" => Some(12),
        _ => None,
    }
}

/// Parse a `connected_on` value to an ISO date. None on any failure.
pub fn parse_connected_on(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.trim().to_lowercase();
    if cleaned.is_empty() {
        return None;
    }

    let folded: String = cleaned
        .chars()
        .map(|c| match c {
            '-' | '/' | '.' | ',' => ' ',
            other => other,
        })
        .collect();

    let parts: Vec<&str> = folded.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }

    let day: u32 = parts[0].parse().ok()?;
    let month = month_number(parts[1])?;
    let year: i32 = parts[2].parse().ok()?;

    if !(1900..=2100).contains(&year) || !(1..=31).contains(&day) {
        return None;
    }

    // from_ymd_opt enforces per-month day counts and leap years.
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_english_abbreviations() {
        assert_eq!(parse_connected_on("02 Dec 2025"), Some(date(2025, 12, 2)));
        assert_eq!(parse_connected_on("09 feb 2026"), Some(date(2026, 2, 9)));
    }

    #[test]
    fn parses_spanish_months() {
        assert_eq!(parse_connected_on("09 ene 2026"), Some(date(2026, 1, 9)));
        assert_eq!(parse_connected_on("02 Dic 2025"), Some(date(2025, 12, 2)));
        assert_eq!(parse_connected_on("15 agosto 2024"), Some(date(2024, 8, 15)));
        assert_eq!(parse_connected_on("1 abril 2025"), Some(date(2025, 4, 1)));
    }

    #[test]
    fn parses_full_english_months() {
        assert_eq!(parse_connected_on("31 January 2026"), Some(date(2026, 1, 31)));
    }

    #[test]
    fn accepts_alternate_separators() {
        assert_eq!(parse_connected_on("09-feb-2026"), Some(date(2026, 2, 9)));
        assert_eq!(parse_connected_on("09/feb/2026"), Some(date(2026, 2, 9)));
        assert_eq!(parse_connected_on("09.feb.2026"), Some(date(2026, 2, 9)));
        assert_eq!(parse_connected_on("09, feb, 2026"), Some(date(2026, 2, 9)));
    }

    #[test]
    fn rejects_out_of_range() {
        assert_eq!(parse_connected_on("32 feb 2026"), None);
        assert_eq!(parse_connected_on("31 apr 2026"), None);
        assert_eq!(parse_connected_on("09 feb 1899"), None);
        assert_eq!(parse_connected_on("09 feb 2101"), None);
        assert_eq!(parse_connected_on("0 feb 2026"), None);
    }

    #[test]
    fn february_29_only_on_leap_years() {
        assert_eq!(parse_connected_on("29 feb 2024"), Some(date(2024, 2, 29)));
        assert_eq!(parse_connected_on("29 feb 2026"), None);
        assert_eq!(parse_connected_on("29 feb 1900"), None);
        assert_eq!(parse_connected_on("29 feb 2000"), Some(date(2000, 2, 29)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_connected_on(""), None);
        assert_eq!(parse_connected_on("yesterday"), None);
        assert_eq!(parse_connected_on("2026-02-09"), None);
        assert_eq!(parse_connected_on("09 xyz 2026"), None);
        assert_eq!(parse_connected_on("09 feb"), None);
    }
}
