//! Event types for the document audit log.
//!
//! Every lifecycle change and every reviewer action is recorded as an
//! immutable event in the document's append-only log. Lifecycle state is
//! derived by replaying events; the same log doubles as the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a document's append-only log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The document this event belongs to
    pub document_id: Uuid,

    /// Type of event
    pub event_type: DocumentEventType,

    /// Human-readable summary (NO document content)
    pub summary: String,

    /// Actor who caused the event, when a human was involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Structured payload (depends on event type)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Error message if this event records a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentEvent {
    /// Create a new event with the current timestamp
    pub fn new(document_id: Uuid, event_type: DocumentEventType, summary: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            document_id,
            event_type,
            summary,
            actor: None,
            payload: None,
            error: None,
        }
    }

    /// Attach the acting reviewer or author name
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Attach a structured payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach error information
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events that can occur over a document's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentEventType {
    /// Document accepted by the ingestion queue
    Received,

    /// An extraction run has started
    ExtractionStarted,

    /// An extraction run completed (possibly with per-field failures)
    ExtractionCompleted,

    /// An extraction run failed at the document level
    ExtractionFailed,

    /// Extractor output was reconciled into a canonical field set
    Reconciled,

    /// A human overrode a reconciled field value
    OverrideApplied,

    /// A verification session was opened
    SessionOpened,

    /// A session draft was saved
    DraftSaved,

    /// A verification session was closed without committing
    SessionClosed,

    /// A verification session was committed; document is verified
    Verified,
}
