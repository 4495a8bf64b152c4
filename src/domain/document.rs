//! Document identity and lifecycle state, reconstructed from events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{DocumentEvent, DocumentEventType};
use super::fields::ContractKind;

/// Recognized upload formats. PDF only for now; the sniffer checks the
/// `%PDF-` magic, not just the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
}

/// Identity metadata captured at submission, persisted as meta.json and
/// echoed in the `received` event payload so replay alone can rebuild it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: Uuid,
    pub filename: String,
    pub byte_size: u64,
    /// SHA-256 of the uploaded bytes (hex), for audit and duplicate warnings
    pub digest: String,
    pub format: DocumentFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContractKind>,
    pub uploaded_at: DateTime<Utc>,
}

/// Lifecycle state of a document.
///
/// Transitions are monotonic: queued → extracting → extracted | failed,
/// then extracted → verifying → verified. The only way backward is
/// re-submission, which mints a new document id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum LifecycleState {
    Queued,
    Extracting,
    Extracted,
    Failed { error: String },
    Verifying,
    Verified,
}

impl LifecycleState {
    /// Forward-only ordering. Failed shares the extraction-terminal rank
    /// with Extracted: a failed re-run can never fail a document that
    /// already holds a usable extraction, and vice versa.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Extracting => 1,
            Self::Extracted | Self::Failed { .. } => 2,
            Self::Verifying => 3,
            Self::Verified => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Verified)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Failed { .. } => "failed",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A document in the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub byte_size: u64,
    pub digest: String,
    pub kind: Option<ContractKind>,
    pub state: LifecycleState,
    pub uploaded_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent event
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Reconstruct a document from its event log.
    ///
    /// Returns None for an empty log or one that does not start with a
    /// `received` event carrying submission metadata.
    pub fn from_events(events: &[DocumentEvent]) -> Option<Self> {
        let first = events.first()?;
        if first.event_type != DocumentEventType::Received {
            return None;
        }
        let meta: DocumentMeta = serde_json::from_value(first.payload.clone()?).ok()?;

        let mut doc = Self {
            id: meta.id,
            filename: meta.filename,
            byte_size: meta.byte_size,
            digest: meta.digest,
            kind: meta.kind,
            state: LifecycleState::Queued,
            uploaded_at: meta.uploaded_at,
            verified_at: None,
            updated_at: first.timestamp,
        };

        for event in events {
            doc.apply_event(event);
        }

        Some(doc)
    }

    /// Apply a single event. State moves only forward: an event whose
    /// target state does not outrank the current one leaves it unchanged.
    pub fn apply_event(&mut self, event: &DocumentEvent) {
        let next = match event.event_type {
            DocumentEventType::Received => Some(LifecycleState::Queued),
            DocumentEventType::ExtractionStarted => Some(LifecycleState::Extracting),
            DocumentEventType::ExtractionCompleted => Some(LifecycleState::Extracted),
            DocumentEventType::ExtractionFailed => Some(LifecycleState::Failed {
                error: event.error.clone().unwrap_or_default(),
            }),
            DocumentEventType::SessionOpened => Some(LifecycleState::Verifying),
            DocumentEventType::Verified => {
                self.verified_at = Some(event.timestamp);
                Some(LifecycleState::Verified)
            }
            DocumentEventType::Reconciled
            | DocumentEventType::OverrideApplied
            | DocumentEventType::DraftSaved
            | DocumentEventType::SessionClosed => None,
        };

        if let Some(next) = next {
            if next.rank() > self.state.rank() {
                self.state = next;
            }
        }

        self.updated_at = event.timestamp;
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Queued | LifecycleState::Extracting
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received_event(id: Uuid) -> DocumentEvent {
        let meta = DocumentMeta {
            id,
            filename: "lease.pdf".to_string(),
            byte_size: 1024,
            digest: "ab".repeat(32),
            format: DocumentFormat::Pdf,
            kind: Some(ContractKind::Lease),
            uploaded_at: Utc::now(),
        };

        DocumentEvent::new(id, DocumentEventType::Received, "Document received".to_string())
            .with_payload(serde_json::to_value(&meta).unwrap())
    }

    #[test]
    fn test_replay_happy_path() {
        let id = Uuid::new_v4();
        let events = vec![
            received_event(id),
            DocumentEvent::new(id, DocumentEventType::ExtractionStarted, "start".into()),
            DocumentEvent::new(id, DocumentEventType::ExtractionCompleted, "done".into()),
            DocumentEvent::new(id, DocumentEventType::Reconciled, "reconciled".into()),
            DocumentEvent::new(id, DocumentEventType::SessionOpened, "open".into()),
            DocumentEvent::new(id, DocumentEventType::Verified, "verified".into()),
        ];

        let doc = Document::from_events(&events).unwrap();
        assert_eq!(doc.id, id);
        assert_eq!(doc.filename, "lease.pdf");
        assert_eq!(doc.state, LifecycleState::Verified);
        assert!(doc.verified_at.is_some());
    }

    #[test]
    fn test_failure_does_not_regress_extracted() {
        let id = Uuid::new_v4();
        let events = vec![
            received_event(id),
            DocumentEvent::new(id, DocumentEventType::ExtractionStarted, "start".into()),
            DocumentEvent::new(id, DocumentEventType::ExtractionCompleted, "done".into()),
            // A superseding re-run that failed must not take state backward.
            DocumentEvent::new(id, DocumentEventType::ExtractionStarted, "retry".into()),
            DocumentEvent::new(id, DocumentEventType::ExtractionFailed, "failed".into())
                .with_error("backend unreachable"),
        ];

        let doc = Document::from_events(&events).unwrap();
        assert_eq!(doc.state, LifecycleState::Extracted);
    }

    #[test]
    fn test_first_run_failure_is_terminal() {
        let id = Uuid::new_v4();
        let events = vec![
            received_event(id),
            DocumentEvent::new(id, DocumentEventType::ExtractionStarted, "start".into()),
            DocumentEvent::new(id, DocumentEventType::ExtractionFailed, "failed".into())
                .with_error("recognize timed out"),
        ];

        let doc = Document::from_events(&events).unwrap();
        assert_eq!(
            doc.state,
            LifecycleState::Failed {
                error: "recognize timed out".to_string()
            }
        );
        assert!(doc.state.is_terminal());
    }

    #[test]
    fn test_replay_requires_received_first() {
        let id = Uuid::new_v4();
        let events = vec![DocumentEvent::new(
            id,
            DocumentEventType::ExtractionStarted,
            "orphan".into(),
        )];
        assert!(Document::from_events(&events).is_none());
        assert!(Document::from_events(&[]).is_none());
    }

    #[test]
    fn test_rank_order() {
        let states = [
            LifecycleState::Queued,
            LifecycleState::Extracting,
            LifecycleState::Extracted,
            LifecycleState::Verifying,
            LifecycleState::Verified,
        ];
        for pair in states.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert_eq!(
            LifecycleState::Failed { error: String::new() }.rank(),
            LifecycleState::Extracted.rank()
        );
    }
}
