//! Prompt-to-text adapter over an OpenAI-compatible gateway.

use serde_json::{Value, json};
use std::time::Duration;

use super::{LlmClient, OutboundError};

const LLM_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpLlmClient {
    client: reqwest::Client,
    base_url: String,
    key: String,
    model: String,
}

impl HttpLlmClient {
    pub fn new(key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(LLM_TIMEOUT)
                .build()
                .expect("reqwest client"),
            base_url: "https://llm.emergentagent.com/v1".to_string(),
            key,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[rocket::async_trait]
impl LlmClient for HttpLlmClient {
    async fn send(&self, prompt: &str) -> Result<String, OutboundError> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(OutboundError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: Value = response.json().await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| OutboundError::BadResponse("missing completion content".to_string()))
    }
}
