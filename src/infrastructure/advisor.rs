//! HTTP advisor client (§6). A single bounded call; the synthesizer never
//! depends on this succeeding — every caller has a deterministic fallback.

use crate::domain::errors::AdvisorError;
use crate::domain::ports::{Advisor, AdvisorAction, AdvisorResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::time::Duration;

const ADVISOR_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpAdvisor {
    client: ClientWithMiddleware,
    endpoint: String,
    api_key: String,
}

impl HttpAdvisor {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: crate::infrastructure::core::http_client_factory::HttpClientFactory::create_client(),
            endpoint,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAdvice {
    decision: String,
    confidence: i32,
    reasoning: String,
}

/// Advisors occasionally wrap JSON in markdown code fences; strip them
/// before parsing rather than rejecting an otherwise-valid payload.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_leading = trimmed.strip_prefix("```json").or_else(|| trimmed.strip_prefix("```")).unwrap_or(trimmed);
    without_leading.strip_suffix("```").unwrap_or(without_leading).trim()
}

#[async_trait]
impl Advisor for HttpAdvisor {
    async fn advise(&self, prompt: &str) -> Result<AdvisorResponse> {
        let payload = serde_json::json!({
            "prompt": prompt,
            "responseMimeType": "application/json",
        });

        let response = tokio::time::timeout(
            ADVISOR_TIMEOUT,
            self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(&payload).send(),
        )
        .await
        .context("advisor call timed out")?
        .context("advisor transport failure")?;

        if !response.status().is_success() {
            anyhow::bail!("advisor returned status {}", response.status());
        }

        let text = response.text().await.context("advisor response body unreadable")?;
        let cleaned = strip_code_fence(&text);
        let raw: RawAdvice = serde_json::from_str(cleaned).map_err(|e| AdvisorError::Malformed { reason: e.to_string() })?;

        let decision = match raw.decision.to_ascii_uppercase().as_str() {
            "BUY" => AdvisorAction::Buy,
            "SELL" => AdvisorAction::Sell,
            _ => AdvisorAction::Wait,
        };

        Ok(AdvisorResponse {
            decision,
            confidence: raw.confidence.clamp(0, 100),
            reasoning: raw.reasoning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_code_fence_removes_json_fence() {
        let wrapped = "```json\n{\"decision\":\"BUY\"}\n```";
        assert_eq!(strip_code_fence(wrapped), "{\"decision\":\"BUY\"}");
    }

    #[test]
    fn strip_code_fence_passes_through_plain_json() {
        let plain = "{\"decision\":\"WAIT\"}";
        assert_eq!(strip_code_fence(plain), plain);
    }
}
