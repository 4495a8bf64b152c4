//! Extraction run orchestration.
//!
//! Within a document the sequence is strict: recognize once, extract every
//! canonical field independently, persist the run wholesale, then reconcile.
//! Field failures never abort the run; only a recognize-level failure fails
//! the document, and only when no prior usable extraction exists.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    DocumentEvent, DocumentEventType, ExtractedField, FieldKey, LifecycleState, ReconciledField,
    SourceSpan,
};
use crate::reconcile;
use crate::store::{DocumentStore, StoreError};

use super::{
    BackendError, ExtractError, ExtractionRecord, ExtractorBackend, FieldCandidate, FieldFailure,
    RecognizedDocument,
};

/// Timeouts for backend calls
#[derive(Debug, Clone, Copy)]
pub struct ExtractTimeouts {
    /// Whole-document recognize call
    pub recognize: Duration,
    /// Per-field extraction call
    pub field: Duration,
}

impl Default for ExtractTimeouts {
    fn default() -> Self {
        Self {
            recognize: Duration::from_secs(120),
            field: Duration::from_secs(30),
        }
    }
}

/// Result of one extraction run, including the auto-reconciled set.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub record: ExtractionRecord,
    pub reconciled: Vec<ReconciledField>,
    /// Unknown-key warnings from reconciliation
    pub warnings: Vec<String>,
}

/// Runs extraction for one document at a time. Documents are independent;
/// callers may run many pipelines concurrently.
pub struct ExtractionPipeline {
    store: DocumentStore,
    backend: Arc<dyn ExtractorBackend>,
    timeouts: ExtractTimeouts,
}

impl ExtractionPipeline {
    pub fn new(
        store: DocumentStore,
        backend: Arc<dyn ExtractorBackend>,
        timeouts: ExtractTimeouts,
    ) -> Self {
        Self {
            store,
            backend,
            timeouts,
        }
    }

    /// Run extraction for a document.
    ///
    /// Legal in `queued` (first run), `extracting` (at-least-once recovery
    /// after a crash) and `extracted` (supersede). The persisted run always
    /// replaces the prior one entirely.
    #[instrument(skip(self), fields(document_id = %id, backend = %self.backend.name()))]
    pub async fn extract(&self, id: Uuid) -> Result<ExtractionOutcome, ExtractError> {
        let document = match self.store.document(id).await {
            Ok(doc) => doc,
            Err(StoreError::DocumentNotFound(id)) => {
                return Err(ExtractError::DocumentNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };

        match document.state {
            LifecycleState::Queued | LifecycleState::Extracting | LifecycleState::Extracted => {}
            ref state => {
                return Err(ExtractError::InvalidState {
                    state: state.clone(),
                })
            }
        }

        let has_prior = document.state == LifecycleState::Extracted;
        let bytes = self.store.read_original(id).await?;

        self.store.append_event(&DocumentEvent::new(
            id,
            DocumentEventType::ExtractionStarted,
            format!("Extraction started for '{}'", document.filename),
        ))?;

        let recognized = match timeout(
            self.timeouts.recognize,
            self.backend
                .recognize(&bytes, &document.filename, self.timeouts.recognize),
        )
        .await
        {
            Ok(Ok(recognized)) => recognized,
            Ok(Err(e)) => return self.handle_recognize_failure(id, has_prior, e),
            Err(_) => return self.handle_recognize_failure(id, has_prior, BackendError::Timeout),
        };

        info!(pages = recognized.pages.len(), "Document recognized");

        // Each field is independent: collect failures, keep going.
        let run_id = Uuid::new_v4();
        let extracted_at = Utc::now();
        let mut fields: Vec<ExtractedField> = Vec::new();
        let mut failed: Vec<FieldFailure> = Vec::new();

        for key in FieldKey::all() {
            let result = timeout(
                self.timeouts.field,
                self.backend
                    .extract_field(&recognized, *key, self.timeouts.field),
            )
            .await
            .unwrap_or(Err(BackendError::Timeout));

            match result {
                Ok(candidates) => {
                    for candidate in candidates {
                        let span = find_value_span(&recognized, &candidate);
                        fields.push(ExtractedField {
                            key: candidate.key,
                            value: candidate.value,
                            confidence: candidate.confidence.min(100),
                            span,
                            extracted_at,
                        });
                    }
                }
                Err(e) => {
                    warn!(field = %key, error = %e, "Field extraction failed");
                    failed.push(FieldFailure {
                        key: *key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let record = ExtractionRecord {
            run_id,
            extracted_at,
            fields,
            failed,
        };
        self.store.save_extraction(id, &record).await?;

        self.store.append_event(
            &DocumentEvent::new(
                id,
                DocumentEventType::ExtractionCompleted,
                format!(
                    "Extraction completed: {} candidate(s), {} field failure(s)",
                    record.fields.len(),
                    record.failed.len()
                ),
            )
            .with_payload(serde_json::json!({
                "run_id": run_id,
                "candidates": record.fields.len(),
                "failed": record.failed,
            })),
        )?;

        // Strict sequential dependency: reconciliation only after the run
        // has fully completed.
        let outcome = reconcile::reconcile(&record.fields);
        self.store.save_reconciled(id, &outcome.fields).await?;

        self.store.append_event(
            &DocumentEvent::new(
                id,
                DocumentEventType::Reconciled,
                format!(
                    "Reconciled {} field(s), {} warning(s)",
                    outcome.fields.len(),
                    outcome.warnings.len()
                ),
            )
            .with_payload(serde_json::json!({
                "fields": outcome.fields.len(),
                "warnings": outcome.warnings,
            })),
        )?;

        info!(
            fields = outcome.fields.len(),
            failed = record.failed.len(),
            "Extraction run complete"
        );

        Ok(ExtractionOutcome {
            record,
            reconciled: outcome.fields,
            warnings: outcome.warnings,
        })
    }

    /// A recognize failure fails the whole run. The document only moves to
    /// `failed` when it holds no usable prior extraction; replay's forward-
    /// only guard keeps a superseding re-run from regressing `extracted`.
    fn handle_recognize_failure(
        &self,
        id: Uuid,
        has_prior: bool,
        error: BackendError,
    ) -> Result<ExtractionOutcome, ExtractError> {
        warn!(%error, has_prior, "Recognize failed");

        self.store.append_event(
            &DocumentEvent::new(
                id,
                DocumentEventType::ExtractionFailed,
                "Document recognition failed".to_string(),
            )
            .with_error(error.to_string()),
        )?;

        Err(ExtractError::Backend(error))
    }
}

/// Backfill a source span by exact search of the candidate value in the
/// recognized text. Exact match only; no match stays None rather than
/// guessing a location.
fn find_value_span(document: &RecognizedDocument, candidate: &FieldCandidate) -> Option<SourceSpan> {
    if candidate.value.is_empty() {
        return None;
    }

    let search = |page: &super::RecognizedPage| {
        page.text.find(&candidate.value).map(|start| SourceSpan {
            page: page.number,
            start,
            end: start + candidate.value.len(),
        })
    };

    // Prefer the page the backend hinted at.
    if let Some(number) = candidate.page {
        if let Some(page) = document.page(number) {
            if let Some(span) = search(page) {
                return Some(span);
            }
        }
    }

    document.pages.iter().find_map(search)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RecognizedPage;

    fn recognized() -> RecognizedDocument {
        RecognizedDocument {
            pages: vec![
                RecognizedPage {
                    number: 1,
                    text: "契約番号 C-2025-001\n月額賃料 ¥500,000".to_string(),
                },
                RecognizedPage {
                    number: 2,
                    text: "貸主電話番号 03-1234-5678".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_span_backfill_with_page_hint() {
        let candidate = FieldCandidate {
            key: "lessor_phone".to_string(),
            value: "03-1234-5678".to_string(),
            confidence: 65,
            page: Some(2),
        };

        let span = find_value_span(&recognized(), &candidate).unwrap();
        assert_eq!(span.page, 2);
        assert_eq!(
            &recognized().pages[1].text[span.start..span.end],
            "03-1234-5678"
        );
    }

    #[test]
    fn test_span_backfill_searches_all_pages() {
        let candidate = FieldCandidate {
            key: "contract_number".to_string(),
            value: "C-2025-001".to_string(),
            confidence: 98,
            page: None,
        };

        let span = find_value_span(&recognized(), &candidate).unwrap();
        assert_eq!(span.page, 1);
    }

    #[test]
    fn test_span_backfill_no_match_stays_none() {
        let candidate = FieldCandidate {
            key: "deposit".to_string(),
            value: "¥1,000,000".to_string(),
            confidence: 80,
            page: None,
        };

        assert!(find_value_span(&recognized(), &candidate).is_none());
    }
}
