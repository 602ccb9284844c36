//! reqwest-backed actor client.

use serde_json::Value;
use std::time::Duration;

use super::{ActorClient, OutboundError, body_signals_quota};

/// Timeout for synchronous actor runs; searches routinely take minutes.
const ACTOR_TIMEOUT: Duration = Duration::from_secs(300);

pub struct HttpActorClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpActorClient {
    pub fn new(token: String) -> Self {
        Self::with_base_url("https://api.apify.com/v2".to_string(), token)
    }

    pub fn with_base_url(base_url: String, token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(ACTOR_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            base_url,
            token,
        }
    }

    fn classify_failure(status: reqwest::StatusCode, body: String) -> OutboundError {
        if status.as_u16() == 429 || body_signals_quota(&body) {
            OutboundError::RateLimited { detail: body }
        } else {
            OutboundError::Status {
                status: status.as_u16(),
                detail: body,
            }
        }
    }
}

/// Calendar reader over an OAuth-fronted events endpoint.
pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCalendarClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
            base_url,
            token,
        }
    }
}

#[rocket::async_trait]
impl super::CalendarClient for HttpCalendarClient {
    async fn attendee_emails(&self, event_id: &str) -> Result<Vec<String>, OutboundError> {
        let url = format!("{}/events/{}", self.base_url, event_id);
        let response = self.client.get(&url).bearer_auth(&self.token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OutboundError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: Value = response.json().await?;
        let attendees = payload["attendees"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|a| a["email"].as_str().map(|s| s.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(attendees)
    }
}

#[rocket::async_trait]
impl ActorClient for HttpActorClient {
    async fn run_actor(&self, actor_id: &str, input: &Value) -> Result<Vec<Value>, OutboundError> {
        let url = format!(
            "{}/acts/{}/run-sync-get-dataset-items?token={}",
            self.base_url, actor_id, self.token
        );

        let response = self.client.post(&url).json(input).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, body));
        }

        let payload: Value = response.json().await?;
        match payload {
            Value::Array(items) => Ok(items),
            other => Err(OutboundError::BadResponse(format!(
                "expected array of dataset items, got {}",
                other
            ))),
        }
    }
}
