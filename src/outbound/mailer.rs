//! SES-like mail transport.

use serde_json::json;
use std::time::Duration;

use super::{Mailer, OutboundError, SendOutcome};

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpMailer {
    client: reqwest::Client,
    endpoint: String,
    sender: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, sender: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .expect("reqwest client"),
            endpoint,
            sender,
        }
    }
}

#[rocket::async_trait]
impl Mailer for HttpMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<SendOutcome, OutboundError> {
        let body = json!({
            "from": self.sender,
            "to": to,
            "subject": subject,
            "html": html,
            "text": text,
        });

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OutboundError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        Ok(SendOutcome {
            success: true,
            message_id: payload["message_id"].as_str().map(|s| s.to_string()),
        })
    }
}
