//! Environment-level configuration.
//!
//! Everything tunable lives here as either an environment lookup (tokens,
//! URLs, sender identity) or a compile-time constant (worker timing and
//! goals). Core paths never take dynamic overrides.

use std::path::PathBuf;
use thiserror::Error;

/// Rows per bulk write batch in the import main pass.
pub const BATCH_SIZE: usize = 500;
/// Seconds between heartbeat writes while a job is processing.
pub const HEARTBEAT_INTERVAL_SECS: i64 = 30;
/// A processing job with no heartbeat for this long is orphaned.
pub const ORPHAN_TIMEOUT_SECS: i64 = 300;
/// Attempts before a job is terminally failed.
pub const MAX_ATTEMPTS: i32 = 3;
/// Days audit rows (conflicts, invalid rows, parse failures) are retained.
pub const AUDIT_TTL_DAYS: i64 = 90;
/// Weekly contact goal per position-search finder.
pub const WEEKLY_GOAL_PER_FINDER: i64 = 50;
/// Weekly contact goal across all finders.
pub const WEEKLY_GOAL_TOTAL: i64 = 150;

/// Retry backoff by attempt number. Attempt 3 is terminal.
pub fn retry_backoff_secs(attempt: i32) -> i64 {
    match attempt {
        1 => 60,
        2 => 300,
        _ => 300,
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
}

/// Settings resolved once at startup and managed as Rocket state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HS256 secret used to validate bearer tokens from the HTTP layer.
    pub secret_key: String,
    /// Token for the outbound search actor (position search, scraping).
    pub apify_token: String,
    /// Token for HubSpot pipeline sync calls.
    pub hubspot_token: String,
    /// Key for the LLM adapter (auto-newsletter content).
    pub llm_key: String,
    /// Default sender identity stamped on queued emails.
    pub sender_identity: String,
    /// Base URL used when building links inside generated emails.
    pub frontend_url: String,
    /// Directory where uploaded CSV files are spooled.
    pub upload_dir: PathBuf,
    /// Endpoint of the SES-like transport the email queue drain posts to.
    pub mailer_endpoint: String,
    /// Calendar API base URL for attendee lookups.
    pub calendar_api_url: String,
    /// OAuth token for the calendar adapter.
    pub calendar_token: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            secret_key: std::env::var("SECRET_KEY")
                .map_err(|_| ConfigError::MissingVar("SECRET_KEY"))?,
            apify_token: std::env::var("APIFY_TOKEN").unwrap_or_default(),
            hubspot_token: std::env::var("HUBSPOT_TOKEN").unwrap_or_default(),
            llm_key: std::env::var("EMERGENT_LLM_KEY").unwrap_or_default(),
            sender_identity: std::env::var("SES_SENDER")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            frontend_url: std::env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            upload_dir: std::env::var("IMPORT_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/linkedin_imports")),
            mailer_endpoint: std::env::var("MAILER_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:8025/send".to_string()),
            calendar_api_url: std::env::var("CALENDAR_API_URL")
                .unwrap_or_else(|_| "https://www.googleapis.com/calendar/v3".to_string()),
            calendar_token: std::env::var("CALENDAR_OAUTH_TOKEN").unwrap_or_default(),
        })
    }
}
