//! Intake queue for uploaded contract documents.
//!
//! Accepts PDF bytes, validates them against intake limits, and records the
//! document in the store with a `received` event. All queue state is derived
//! from replaying the per-document event logs, so there is no separate queue
//! file to drift out of sync.

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    ContractKind, Document, DocumentEvent, DocumentEventType, DocumentFormat, DocumentMeta,
    LifecycleState,
};
use crate::store::{DocumentStore, StoreError};

/// Default cap on a single uploaded document.
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Default cap on documents that are queued or extracting at once.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;

/// Errors that can occur during document intake
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Unsupported format for {filename}: only PDF documents are accepted")]
    UnsupportedFormat { filename: String },

    #[error("Document is {actual} bytes, over the {limit}-byte limit")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("Queue is full: {in_flight} documents in flight (limit {limit})")]
    QueueCapacityExceeded { in_flight: usize, limit: usize },

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Intake limits, overridable through configuration
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_document_bytes: u64,
    pub max_in_flight: usize,
}

impl Default for IngestLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Caller-provided metadata for a submission
#[derive(Debug, Clone)]
pub struct SubmitMeta {
    pub filename: String,
    pub kind: Option<ContractKind>,
}

/// Outcome of a successful submission
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub document_id: Uuid,
    pub digest: String,

    /// True when another document with the same content digest already
    /// exists. The submission still goes through.
    pub duplicate: bool,
}

/// Document intake queue backed by the document store
pub struct IngestQueue {
    store: DocumentStore,
    limits: IngestLimits,
}

impl IngestQueue {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            limits: IngestLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: IngestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    /// Submit a document for extraction.
    ///
    /// Validation order: format, size, capacity. Duplicate content is
    /// accepted with a warning; amended re-uploads of the same contract are
    /// a normal part of the workflow.
    ///
    /// The in-flight limit is advisory: the count-then-create below is not
    /// atomic across processes, so concurrent submits can briefly exceed
    /// it. It bounds backlog, it is not an exclusivity guarantee.
    pub async fn submit(
        &self,
        bytes: &[u8],
        meta: SubmitMeta,
    ) -> Result<SubmitReceipt, IngestError> {
        if !is_pdf(&meta.filename, bytes) {
            return Err(IngestError::UnsupportedFormat {
                filename: meta.filename,
            });
        }

        let byte_size = bytes.len() as u64;
        if byte_size > self.limits.max_document_bytes {
            return Err(IngestError::SizeLimitExceeded {
                actual: byte_size,
                limit: self.limits.max_document_bytes,
            });
        }

        let documents = self.store.list_documents().await?;
        let in_flight = documents.iter().filter(|d| d.is_in_flight()).count();
        if in_flight >= self.limits.max_in_flight {
            return Err(IngestError::QueueCapacityExceeded {
                in_flight,
                limit: self.limits.max_in_flight,
            });
        }

        let digest = content_digest(bytes);
        let duplicate = documents.iter().any(|d| d.digest == digest);
        if duplicate {
            warn!(
                digest = %digest,
                filename = %meta.filename,
                "Submitted content matches an existing document"
            );
        }

        let document_id = Uuid::new_v4();
        let document_meta = DocumentMeta {
            id: document_id,
            filename: meta.filename.clone(),
            byte_size,
            digest: digest.clone(),
            format: DocumentFormat::Pdf,
            kind: meta.kind,
            uploaded_at: chrono::Utc::now(),
        };

        self.store.create_document(document_id).await?;
        self.store.save_original(document_id, bytes).await?;
        self.store.save_meta(&document_meta).await?;

        self.store.append_event(
            &DocumentEvent::new(
                document_id,
                DocumentEventType::Received,
                format!("Received {} ({} bytes)", meta.filename, byte_size),
            )
            .with_payload(serde_json::to_value(&document_meta).map_err(StoreError::from)?),
        )?;

        info!(document_id = %document_id, filename = %meta.filename, "Document queued");

        Ok(SubmitReceipt {
            document_id,
            digest,
            duplicate,
        })
    }

    /// Current lifecycle state of a document
    pub async fn status(&self, document_id: Uuid) -> Result<LifecycleState, IngestError> {
        match self.store.document(document_id).await {
            Ok(document) => Ok(document.state),
            Err(StoreError::DocumentNotFound(id)) => Err(IngestError::DocumentNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Documents sorted by upload time, most recent first
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<Document>, IngestError> {
        let mut documents = self.store.list_documents().await?;
        if let Some(limit) = limit {
            documents.truncate(limit);
        }
        Ok(documents)
    }

    /// Whether any document already carries this content digest
    pub async fn digest_exists(&self, digest: &str) -> Result<bool, IngestError> {
        let documents = self.store.list_documents().await?;
        Ok(documents.iter().any(|d| d.digest == digest))
    }
}

/// PDF check: extension plus the magic header. Extension alone is not
/// trusted; renamed scans show up often.
fn is_pdf(filename: &str, bytes: &[u8]) -> bool {
    let extension_ok = filename
        .rsplit('.')
        .next()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);

    extension_ok && bytes.starts_with(b"%PDF-")
}

/// SHA256 hex digest of the document content
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
