use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::{config::GeminiConfig, domain::ForageSubmission};

use super::{
    inference::{build_request, parse_response},
    ForageModel,
};

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(http: Client, config: GeminiConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl ForageModel for GeminiClient {
    async fn analyze(&self, submission: &ForageSubmission) -> Result<String> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .context("GEMINI_API_KEY must be configured for forage analysis")?;

        let request = build_request(submission);
        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .context("failed to reach the Gemini API")?;

        let text = parse_response(response).await?;
        tracing::debug!(
            target: "gemini",
            model = %self.config.model,
            chars = text.len(),
            "analysis text received"
        );
        Ok(text)
    }
}
