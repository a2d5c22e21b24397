//! Client for the field-extraction HTTP API.
//!
//! Submits converted document text plus the caller's schema and gets back
//! structured fields. Transient failures are retried with a linear
//! backoff before giving up.

use std::time::Duration;

use crate::EngineError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// HTTP client for the extraction service.
pub struct ExtractionClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    max_attempts: u32,
}

impl ExtractionClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Extract structured fields from `content` according to `schema`.
    pub async fn extract(
        &self,
        content: &str,
        schema: &serde_json::Value,
        instructions: Option<&str>,
    ) -> Result<serde_json::Value, EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call(content, schema, instructions).await {
                Ok(fields) => return Ok(fields),
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Extraction attempt failed, retrying"
                    );
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "Extraction failed");
                    return Err(err);
                }
            }
        }
    }

    async fn call(
        &self,
        content: &str,
        schema: &serde_json::Value,
        instructions: Option<&str>,
    ) -> Result<serde_json::Value, EngineError> {
        let mut request = self.client.post(&self.endpoint).json(&serde_json::json!({
            "content": content,
            "schema": schema,
            "instructions": instructions,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::ExtractionApi {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}
