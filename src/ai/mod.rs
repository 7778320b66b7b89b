mod client;
pub mod inference;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::ForageSubmission;

pub use client::GeminiClient;

/// A generative model that can judge the forage around a site.
#[async_trait]
pub trait ForageModel: Send + Sync {
    async fn analyze(&self, submission: &ForageSubmission) -> Result<String>;
}
