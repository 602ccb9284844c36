//! Narrow interfaces to external collaborators.
//!
//! The core consumes four opaque seams: an HTTP search actor (Apify-style),
//! an LLM adapter, an SES-like mailer, and a calendar reader. Each is a
//! trait with a reqwest-backed production implementation here and stub
//! implementations in tests. Rate-limit classification lives at this layer:
//! a 429 status or a quota-style body is surfaced as
//! [`OutboundError::RateLimited`] so callers can emit week-scoped alerts.

pub mod http;
pub mod llm;
pub mod mailer;

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("rate limited: {detail}")]
    RateLimited { detail: String },
    #[error("upstream status {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

impl OutboundError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Body text that means the upstream is throttling us even without a 429.
pub fn body_signals_quota(body: &str) -> bool {
    let lowered = body.to_lowercase();
    lowered.contains("limit") || lowered.contains("quota")
}

/// Dispatches search actor runs (position search, pipeline scraping).
#[rocket::async_trait]
pub trait ActorClient: Send + Sync {
    /// Run an actor synchronously and return its dataset items.
    async fn run_actor(&self, actor_id: &str, input: &Value) -> Result<Vec<Value>, OutboundError>;
}

/// Synchronous prompt-to-text adapter.
#[rocket::async_trait]
pub trait LlmClient: Send + Sync {
    async fn send(&self, prompt: &str) -> Result<String, OutboundError>;
}

/// Outcome reported by the mail transport.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
}

/// SES-like transport used by the email queue drain, never by imports.
#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<SendOutcome, OutboundError>;
}

/// Reads attendee email lists for calendar events.
#[rocket::async_trait]
pub trait CalendarClient: Send + Sync {
    async fn attendee_emails(&self, event_id: &str) -> Result<Vec<String>, OutboundError>;
}

/// Bundle of collaborator handles managed as Rocket state.
#[derive(Clone)]
pub struct Collaborators {
    pub actor: Arc<dyn ActorClient>,
    pub llm: Arc<dyn LlmClient>,
    pub mailer: Arc<dyn Mailer>,
    pub calendar: Arc<dyn CalendarClient>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_detection_matches_known_phrases() {
        assert!(body_signals_quota("Monthly usage LIMIT exceeded"));
        assert!(body_signals_quota("quota reached for this account"));
        assert!(!body_signals_quota("all good"));
    }
}
