//! Identifier normalization for deduplication keys.

use std::sync::LazyLock;

static QUERY_SUFFIX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\?.*$").expect("valid regex"));
static OVERLAY_SUFFIX: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"/overlay/.*$").expect("valid regex"));
static EMAIL_SHAPE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

/// Normalize a LinkedIn URL for matching: lowercase, strip query and
/// `/overlay/...` suffixes, strip the trailing slash. Returns None when the
/// input collapses to nothing.
pub fn normalize_linkedin_url(url: &str) -> Option<String> {
    let mut url = url.trim().to_lowercase();
    if url.is_empty() {
        return None;
    }
    url = QUERY_SUFFIX.replace(&url, "").into_owned();
    url = OVERLAY_SUFFIX.replace(&url, "").into_owned();
    let url = url.trim_end_matches('/').to_string();
    if url.is_empty() { None } else { Some(url) }
}

/// Lowercased, trimmed email; None when empty.
pub fn normalize_email(email: &str) -> Option<String> {
    let email = email.trim().to_lowercase();
    if email.is_empty() { None } else { Some(email) }
}

/// Loose structural check used to emit `email_invalid_format` audit rows.
pub fn email_looks_valid(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email)
}

/// Company names dedupe on the lowercased, trimmed form.
pub fn normalize_company_name(name: &str) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() { None } else { Some(name) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_strips_query_and_overlay() {
        assert_eq!(
            normalize_linkedin_url("https://linkedin.com/in/Jane?trk=abc"),
            Some("https://linkedin.com/in/jane".to_string())
        );
        assert_eq!(
            normalize_linkedin_url("https://linkedin.com/in/jane/overlay/about-this-profile/"),
            Some("https://linkedin.com/in/jane".to_string())
        );
    }

    #[test]
    fn url_strips_trailing_slash() {
        assert_eq!(
            normalize_linkedin_url("https://linkedin.com/in/jane/"),
            Some("https://linkedin.com/in/jane".to_string())
        );
    }

    #[test]
    fn url_normalization_is_idempotent() {
        let once = normalize_linkedin_url("HTTPS://LinkedIn.com/in/Jane/?x=1").unwrap();
        assert_eq!(normalize_linkedin_url(&once), Some(once.clone()));
    }

    #[test]
    fn empty_url_is_rejected() {
        assert_eq!(normalize_linkedin_url("   "), None);
        assert_eq!(normalize_linkedin_url("?only=query"), None);
    }

    #[test]
    fn email_normalizes_case() {
        assert_eq!(
            normalize_email(" Jane@Acme.COM "),
            Some("jane@acme.com".to_string())
        );
        assert_eq!(normalize_email(""), None);
    }

    #[test]
    fn email_shape_check() {
        assert!(email_looks_valid("jane@acme.com"));
        assert!(!email_looks_valid("jane@acme"));
        assert!(!email_looks_valid("not-an-email"));
        assert!(!email_looks_valid("two@@acme.com"));
    }

    #[test]
    fn company_name_folds_case() {
        assert_eq!(normalize_company_name(" Acme Corp "), Some("acme corp".to_string()));
        assert_eq!(normalize_company_name(""), None);
    }
}
