//! Extraction pipeline: OCR/LLM backend interface and the per-document
//! extraction run that turns stored bytes into field candidates.
//!
//! The backend contract is deliberately small: given document bytes, return
//! per-page recognized text; given recognized text and a canonical field
//! key, return candidates with confidences, or fail. Model and OCR engine
//! internals stay behind the trait.

pub mod http;
pub mod pipeline;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ExtractedField, FieldKey, LifecycleState};
use crate::store::StoreError;

pub use http::HttpExtractorBackend;
pub use pipeline::{ExtractionOutcome, ExtractionPipeline, ExtractTimeouts};

/// Errors from an extractor backend
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Backend call timed out")]
    Timeout,

    #[error("Backend rejected the request: {message}")]
    Rejected { message: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http {
                message: e.to_string(),
            }
        }
    }
}

/// Errors from an extraction run
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Extraction is not legal in state '{state}'")]
    InvalidState { state: LifecycleState },

    #[error("Extraction failed: {0}")]
    Backend(#[from] BackendError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Per-page recognized text for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedDocument {
    pub pages: Vec<RecognizedPage>,
}

impl RecognizedDocument {
    pub fn page(&self, number: u32) -> Option<&RecognizedPage> {
        self.pages.iter().find(|p| p.number == number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedPage {
    /// 1-indexed page number
    pub number: u32,
    pub text: String,
}

/// One candidate value for one field, as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCandidate {
    /// Raw key as the backend spells it (may be camelCase)
    pub key: String,
    pub value: String,
    /// Producer-assigned confidence, 0-100
    pub confidence: u8,
    /// Page the value was found on, if the backend knows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// A field the backend could not extract in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFailure {
    pub key: FieldKey,
    pub reason: String,
}

/// The persisted result of one extraction run. Replaced wholesale on each
/// run; two runs are never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub run_id: Uuid,
    pub extracted_at: DateTime<Utc>,
    pub fields: Vec<ExtractedField>,
    #[serde(default)]
    pub failed: Vec<FieldFailure>,
}

/// Interface to the OCR/LLM extraction service.
#[async_trait]
pub trait ExtractorBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Recognize per-page text from raw document bytes
    async fn recognize(
        &self,
        bytes: &[u8],
        filename: &str,
        timeout: Duration,
    ) -> Result<RecognizedDocument, BackendError>;

    /// Extract candidates for one canonical field from recognized text
    async fn extract_field(
        &self,
        document: &RecognizedDocument,
        key: FieldKey,
        timeout: Duration,
    ) -> Result<Vec<FieldCandidate>, BackendError>;

    /// Health check (for HTTP backends)
    async fn health_check(&self) -> Result<(), BackendError>;
}
