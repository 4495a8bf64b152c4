//! HTTP extractor backend.
//!
//! Talks to a configured OCR/LLM service: `/recognize` takes the document
//! bytes as a multipart upload and returns per-page text; `/fields/{key}`
//! takes the recognized pages as JSON and returns field candidates.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::domain::FieldKey;

use super::{BackendError, ExtractorBackend, FieldCandidate, RecognizedDocument};

/// Client for the extraction service
pub struct HttpExtractorBackend {
    base_url: String,
    client: reqwest::Client,
}

/// Response envelope from the extraction service
#[derive(Debug, Deserialize)]
struct ExtractorResponse<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

impl HttpExtractorBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build the backend from the resolved configuration.
    pub fn from_config() -> anyhow::Result<Self> {
        let settings = crate::config::extract_settings()?;
        Ok(Self::new(settings.backend_url))
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn unwrap_envelope<T>(response: ExtractorResponse<T>) -> Result<T, BackendError> {
        if !response.ok {
            return Err(BackendError::Rejected {
                message: response.error.unwrap_or_default(),
            });
        }
        response.result.ok_or_else(|| BackendError::Rejected {
            message: "empty result".to_string(),
        })
    }
}

#[async_trait]
impl ExtractorBackend for HttpExtractorBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn recognize(
        &self,
        bytes: &[u8],
        filename: &str,
        timeout: Duration,
    ) -> Result<RecognizedDocument, BackendError> {
        let url = self.api_url("recognize");

        let file_part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Http {
                message: e.to_string(),
            })?;

        let form = Form::new().part("document", file_part);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?;

        let envelope: ExtractorResponse<RecognizedDocument> = response.json().await?;
        Self::unwrap_envelope(envelope)
    }

    async fn extract_field(
        &self,
        document: &RecognizedDocument,
        key: FieldKey,
        timeout: Duration,
    ) -> Result<Vec<FieldCandidate>, BackendError> {
        let url = self.api_url(&format!("fields/{}", key.as_str()));

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&serde_json::json!({ "pages": document.pages }))
            .send()
            .await?;

        let envelope: ExtractorResponse<Vec<FieldCandidate>> = response.json().await?;
        Self::unwrap_envelope(envelope)
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let url = self.api_url("health");

        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Http {
                message: format!("health check returned {}", response.status()),
            })
        }
    }
}
