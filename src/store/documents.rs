//! Per-document persistence with an append-only event log.
//!
//! Layout under the documents root:
//!
//! ```text
//! documents/<document_id>/
//! ├── meta.json          # identity, filename, size, digest, kind
//! ├── original.pdf       # stored upload bytes
//! ├── events.jsonl       # append-only lifecycle + audit events
//! ├── extraction.json    # latest extraction run (replaced wholesale)
//! ├── reconciled.json    # canonical reconciled field set
//! ├── session.json       # open verification session (exclusivity)
//! └── draft.json         # saved draft (survives close/reopen)
//! ```
//!
//! Events are newline-delimited JSON for easy inspection; document state is
//! derived by replay. The reconciled set is replaced atomically (temp file +
//! rename) so concurrent readers never observe a partial field set.

use std::path::{Path, PathBuf};

use fs2::FileExt;
use std::io::Write;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

use crate::domain::{Document, DocumentEvent, DocumentMeta, ReconciledField};
use crate::extract::ExtractionRecord;

/// Errors from document persistence
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// File-based document store. Cheap to clone; all state lives on disk.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    /// Directory containing one subdirectory per document
    root: PathBuf,
}

impl DocumentStore {
    /// Create a store rooted at the given documents directory.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Open the store at the configured location (~/.keiyaku/documents).
    pub async fn open_default() -> anyhow::Result<Self> {
        let root = crate::config::documents_dir()?;
        fs::create_dir_all(&root).await?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn events_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("events.jsonl")
    }

    pub fn original_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("original.pdf")
    }

    pub fn session_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("session.json")
    }

    pub fn draft_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("draft.json")
    }

    fn meta_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("meta.json")
    }

    fn extraction_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("extraction.json")
    }

    fn reconciled_path(&self, id: Uuid) -> PathBuf {
        self.document_dir(id).join("reconciled.json")
    }

    /// Create the directory for a new document.
    pub async fn create_document(&self, id: Uuid) -> Result<(), StoreError> {
        fs::create_dir_all(self.document_dir(id)).await?;
        Ok(())
    }

    /// Append an event to the document's log. Holds an exclusive file lock
    /// for the duration of the write so concurrent processes interleave at
    /// line granularity, never mid-line.
    pub fn append_event(&self, event: &DocumentEvent) -> Result<(), StoreError> {
        let path = self.events_path(event.document_id);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        file.lock_exclusive()?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json)?;
        file.flush()?;

        // Lock released on drop
        Ok(())
    }

    /// Replay all events for a document, in append order.
    pub async fn replay(&self, id: Uuid) -> Result<Vec<DocumentEvent>, StoreError> {
        let path = self.events_path(id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: DocumentEvent = serde_json::from_str(&line)?;
            events.push(event);
        }

        Ok(events)
    }

    /// Rebuild a document from its event log.
    pub async fn document(&self, id: Uuid) -> Result<Document, StoreError> {
        let events = self.replay(id).await?;
        Document::from_events(&events).ok_or(StoreError::DocumentNotFound(id))
    }

    /// List all document ids in the store.
    pub async fn list_ids(&self) -> Result<Vec<Uuid>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(id) = Uuid::parse_str(name) {
                        ids.push(id);
                    }
                }
            }
        }

        Ok(ids)
    }

    /// All documents, most recently uploaded first.
    pub async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut docs = Vec::new();
        for id in self.list_ids().await? {
            if let Ok(doc) = self.document(id).await {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(docs)
    }

    pub async fn save_original(&self, id: Uuid, bytes: &[u8]) -> Result<(), StoreError> {
        fs::write(self.original_path(id), bytes).await?;
        Ok(())
    }

    pub async fn read_original(&self, id: Uuid) -> Result<Vec<u8>, StoreError> {
        let path = self.original_path(id);
        if !path.exists() {
            return Err(StoreError::DocumentNotFound(id));
        }
        Ok(fs::read(path).await?)
    }

    pub async fn save_meta(&self, meta: &DocumentMeta) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(meta)?;
        fs::write(self.meta_path(meta.id), content).await?;
        Ok(())
    }

    pub async fn load_meta(&self, id: Uuid) -> Result<Option<DocumentMeta>, StoreError> {
        let path = self.meta_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Persist an extraction run, replacing any prior run wholesale.
    /// Two runs are never merged; the latest one supersedes.
    pub async fn save_extraction(
        &self,
        id: Uuid,
        record: &ExtractionRecord,
    ) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(record)?;
        fs::write(self.extraction_path(id), content).await?;
        Ok(())
    }

    pub async fn load_extraction(&self, id: Uuid) -> Result<Option<ExtractionRecord>, StoreError> {
        let path = self.extraction_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Atomically replace the canonical reconciled set: write to a temp
    /// file in the same directory, then rename over the target. Readers
    /// see either the old set or the new one, never a partial write.
    pub async fn save_reconciled(
        &self,
        id: Uuid,
        fields: &[ReconciledField],
    ) -> Result<(), StoreError> {
        let target = self.reconciled_path(id);
        let tmp = self.document_dir(id).join("reconciled.json.tmp");

        let content = serde_json::to_string_pretty(fields)?;
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &target).await?;
        Ok(())
    }

    pub async fn load_reconciled(
        &self,
        id: Uuid,
    ) -> Result<Option<Vec<ReconciledField>>, StoreError> {
        let path = self.reconciled_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}
