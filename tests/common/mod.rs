//! Shared test fixtures: a scripted in-memory extractor backend and
//! temp-store helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use uuid::Uuid;

use keiyaku::domain::FieldKey;
use keiyaku::extract::{
    BackendError, ExtractorBackend, FieldCandidate, RecognizedDocument, RecognizedPage,
};
use keiyaku::ingest::{IngestQueue, SubmitMeta};
use keiyaku::store::DocumentStore;

/// Scripted extractor backend: every call is answered from fixtures set up
/// by the test, no network involved.
pub struct ScriptedBackend {
    pages: Vec<RecognizedPage>,
    candidates: HashMap<FieldKey, Vec<FieldCandidate>>,
    failures: HashMap<FieldKey, String>,
    recognize_error: Option<BackendError>,
    recognize_delay: Option<Duration>,
}

impl ScriptedBackend {
    pub fn new(page_text: &str) -> Self {
        Self {
            pages: vec![RecognizedPage {
                number: 1,
                text: page_text.to_string(),
            }],
            candidates: HashMap::new(),
            failures: HashMap::new(),
            recognize_error: None,
            recognize_delay: None,
        }
    }

    pub fn with_page(mut self, number: u32, text: &str) -> Self {
        self.pages.push(RecognizedPage {
            number,
            text: text.to_string(),
        });
        self
    }

    /// Script one candidate for a canonical key.
    pub fn with_candidate(self, key: FieldKey, value: &str, confidence: u8) -> Self {
        self.with_raw_candidate(key, key.as_str(), value, confidence)
    }

    /// Script a candidate whose raw key spelling differs from canonical
    /// (extractor backends are sloppy about casing).
    pub fn with_raw_candidate(
        mut self,
        key: FieldKey,
        raw_key: &str,
        value: &str,
        confidence: u8,
    ) -> Self {
        self.candidates.entry(key).or_default().push(FieldCandidate {
            key: raw_key.to_string(),
            value: value.to_string(),
            confidence,
            page: None,
        });
        self
    }

    /// Script a per-field failure.
    pub fn with_failure(mut self, key: FieldKey, reason: &str) -> Self {
        self.failures.insert(key, reason.to_string());
        self
    }

    /// Script candidates for every canonical key so a commit can pass.
    pub fn with_all_fields(mut self, confidence: u8) -> Self {
        for key in FieldKey::all() {
            self = self.with_candidate(*key, &format!("value-{}", key.as_str()), confidence);
        }
        self
    }

    /// Fail the recognize call with this error.
    pub fn failing_recognize(mut self, error: BackendError) -> Self {
        self.recognize_error = Some(error);
        self
    }

    /// Sleep this long before recognizing (for timeout tests).
    pub fn slow_recognize(mut self, delay: Duration) -> Self {
        self.recognize_delay = Some(delay);
        self
    }
}

#[async_trait]
impl ExtractorBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize(
        &self,
        _bytes: &[u8],
        _filename: &str,
        _timeout: Duration,
    ) -> Result<RecognizedDocument, BackendError> {
        if let Some(delay) = self.recognize_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref error) = self.recognize_error {
            return Err(error.clone());
        }
        Ok(RecognizedDocument {
            pages: self.pages.clone(),
        })
    }

    async fn extract_field(
        &self,
        _document: &RecognizedDocument,
        key: FieldKey,
        _timeout: Duration,
    ) -> Result<Vec<FieldCandidate>, BackendError> {
        if let Some(reason) = self.failures.get(&key) {
            return Err(BackendError::Rejected {
                message: reason.clone(),
            });
        }
        Ok(self.candidates.get(&key).cloned().unwrap_or_default())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Minimal PDF bytes that pass the intake format check.
pub fn pdf(body: &str) -> Vec<u8> {
    format!("%PDF-1.7\n{}", body).into_bytes()
}

/// Fresh store rooted in a temp directory.
pub fn temp_store(temp: &TempDir) -> DocumentStore {
    DocumentStore::new(temp.path().join("documents"))
}

/// Submit a small PDF and return its document id.
pub async fn submit_pdf(queue: &IngestQueue, filename: &str, body: &str) -> Uuid {
    queue
        .submit(
            &pdf(body),
            SubmitMeta {
                filename: filename.to_string(),
                kind: None,
            },
        )
        .await
        .unwrap()
        .document_id
}
