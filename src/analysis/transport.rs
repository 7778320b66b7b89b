use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;

use crate::domain::{AnalyzeRequest, AnalyzeResponse, ErrorBody, ForageSubmission};

use super::AnalysisError;

/// Dropping the returned future must abort the underlying call.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    async fn submit(&self, submission: &ForageSubmission) -> Result<String, AnalysisError>;
}

#[derive(Clone)]
pub struct ProxyTransport {
    http: Client,
    endpoint: Url,
}

impl ProxyTransport {
    pub fn new(http: Client, endpoint: Url) -> Self {
        Self { http, endpoint }
    }
}

#[async_trait]
impl AnalysisTransport for ProxyTransport {
    async fn submit(&self, submission: &ForageSubmission) -> Result<String, AnalysisError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&AnalyzeRequest::from(submission))
            .send()
            .await
            .map_err(|err| {
                AnalysisError::Upstream(format!("could not reach the analysis service: {err}"))
            })?;

        let status = response.status();
        if status.is_success() {
            let body: AnalyzeResponse = response.json().await.map_err(|err| {
                AnalysisError::Upstream(format!("unexpected analysis response: {err}"))
            })?;
            return Ok(body.text);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) if !body.error.trim().is_empty() => body.error,
            _ => format!("analysis service returned {status}"),
        };
        tracing::warn!(target: "analysis", %status, %message, "analysis service rejected request");

        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(AnalysisError::QuotaExceeded(message))
        } else {
            Err(AnalysisError::Upstream(message))
        }
    }
}
