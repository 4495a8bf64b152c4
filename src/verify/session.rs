//! Verification sessions: a reviewer's working copy of the reconciled set.
//!
//! A session lives as `session.json` inside the document directory, so CLI
//! invocations in separate processes share it. Exclusivity is the file
//! itself: `open` creates it with `create_new`, which is atomic at the
//! filesystem level, so two reviewers can never both hold a session on the
//! same document. Edits and draft saves touch only the working copy; the
//! canonical set changes exactly once, at commit.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    DocumentEvent, DocumentEventType, FieldKey, LifecycleState, ReconciledField,
};
use crate::registry::{Registry, VerifiedRecord};
use crate::store::{DocumentStore, StoreError};

/// Errors from session lifecycle operations. All are surfaced to the
/// reviewer as actionable messages, never silently recovered.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Document is already verified")]
    AlreadyVerified,

    #[error("Document has no completed extraction to verify")]
    NotExtracted,

    #[error("Another verification session is already open for this document")]
    SessionAlreadyOpen,

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session is committed and can no longer be changed")]
    SessionCommitted,

    #[error("Verification incomplete; missing fields: {}", format_keys(.missing_fields))]
    IncompleteVerification { missing_fields: Vec<FieldKey> },

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Registry update failed: {0}")]
    Registry(String),
}

fn format_keys(keys: &[FieldKey]) -> String {
    keys.iter()
        .map(FieldKey::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Session lifecycle: draft until committed, committed forever after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Draft,
    Committed,
}

/// One field in the session's working copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingField {
    #[serde(flatten)]
    pub field: ReconciledField,

    /// True once the reviewer touched this field in any session. Edited
    /// fields become overrides at commit.
    #[serde(default)]
    pub edited: bool,
}

/// A reviewer's verification session over one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSession {
    pub id: Uuid,
    pub document_id: Uuid,
    pub reviewer: String,
    pub status: SessionStatus,
    pub fields: Vec<WorkingField>,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl VerificationSession {
    pub fn field(&self, key: FieldKey) -> Option<&WorkingField> {
        self.fields.iter().find(|f| f.field.key == key)
    }
}

/// Saved-but-uncommitted working copy; survives close and reopen.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDraft {
    document_id: Uuid,
    reviewer: String,
    saved_at: DateTime<Utc>,
    fields: Vec<WorkingField>,
}

/// Coordinates verification sessions against the document store.
pub struct SessionManager {
    store: DocumentStore,
    registry_path: Option<std::path::PathBuf>,
}

impl SessionManager {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store,
            registry_path: None,
        }
    }

    /// Update the verified-records registry at this path on commit.
    pub fn with_registry(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// Open a session on a document.
    ///
    /// Fails with `AlreadyVerified` once committed, `NotExtracted` before a
    /// completed extraction, and `SessionAlreadyOpen` while another session
    /// file exists. The first open moves the document to `verifying`. The
    /// working copy seeds from the saved draft when one exists, else from
    /// the canonical reconciled set.
    #[instrument(skip(self, reviewer), fields(document_id = %document_id))]
    pub async fn open(
        &self,
        document_id: Uuid,
        reviewer: impl Into<String>,
    ) -> Result<VerificationSession, SessionError> {
        let document = match self.store.document(document_id).await {
            Ok(doc) => doc,
            Err(StoreError::DocumentNotFound(id)) => {
                return Err(SessionError::DocumentNotFound(id))
            }
            Err(e) => return Err(e.into()),
        };

        match document.state {
            LifecycleState::Verified => return Err(SessionError::AlreadyVerified),
            LifecycleState::Extracted | LifecycleState::Verifying => {}
            LifecycleState::Queued | LifecycleState::Extracting | LifecycleState::Failed { .. } => {
                return Err(SessionError::NotExtracted)
            }
        }

        let reviewer = reviewer.into();

        let fields = match self.load_draft(document_id).await? {
            Some(draft) => draft.fields,
            None => self
                .store
                .load_reconciled(document_id)
                .await?
                .ok_or(SessionError::NotExtracted)?
                .into_iter()
                .map(|field| WorkingField {
                    field,
                    edited: false,
                })
                .collect(),
        };

        let session = VerificationSession {
            id: Uuid::new_v4(),
            document_id,
            reviewer: reviewer.clone(),
            status: SessionStatus::Draft,
            fields,
            opened_at: Utc::now(),
            last_saved_at: None,
        };

        // Atomic create-new is the exclusivity guarantee.
        let session_path = self.store.session_path(document_id);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&session_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(SessionError::SessionAlreadyOpen)
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(serde_json::to_string_pretty(&session)?.as_bytes())?;
        file.flush()?;

        self.store.append_event(
            &DocumentEvent::new(
                document_id,
                DocumentEventType::SessionOpened,
                format!("Verification session opened by {}", reviewer),
            )
            .with_actor(reviewer)
            .with_payload(serde_json::json!({ "session_id": session.id })),
        )?;

        info!(session_id = %session.id, "Session opened");

        Ok(session)
    }

    /// Find a session by id across all documents.
    pub async fn load(&self, session_id: Uuid) -> Result<VerificationSession, SessionError> {
        for document_id in self.store.list_ids().await? {
            if let Some(session) = self.session_for_document(document_id).await? {
                if session.id == session_id {
                    return Ok(session);
                }
            }
        }
        Err(SessionError::SessionNotFound(session_id))
    }

    /// The session currently held on a document, if any.
    pub async fn session_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Option<VerificationSession>, SessionError> {
        let path = self.store.session_path(document_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Change one field in the working copy. The canonical set is untouched
    /// until commit.
    pub async fn edit_field(
        &self,
        session_id: Uuid,
        key: FieldKey,
        value: impl Into<String>,
    ) -> Result<VerificationSession, SessionError> {
        let mut session = self.load(session_id).await?;
        if session.status == SessionStatus::Committed {
            return Err(SessionError::SessionCommitted);
        }

        let value = value.into();
        match session.fields.iter_mut().find(|f| f.field.key == key) {
            Some(working) => {
                working.field.value = value;
                working.edited = true;
            }
            None => {
                session.fields.push(WorkingField {
                    field: ReconciledField {
                        key,
                        value,
                        confidence: 100,
                        overridden: false,
                        override_author: None,
                        overridden_at: None,
                    },
                    edited: true,
                });
                session.fields.sort_by_key(|f| f.field.key);
            }
        }

        self.write_session(&session).await?;
        Ok(session)
    }

    /// Persist the working copy as a draft. Idempotent: repeated saves
    /// overwrite the prior draft, never append.
    pub async fn save_draft(&self, session_id: Uuid) -> Result<VerificationSession, SessionError> {
        let mut session = self.load(session_id).await?;
        if session.status == SessionStatus::Committed {
            return Err(SessionError::SessionCommitted);
        }

        let draft = SessionDraft {
            document_id: session.document_id,
            reviewer: session.reviewer.clone(),
            saved_at: Utc::now(),
            fields: session.fields.clone(),
        };
        fs::write(
            self.store.draft_path(session.document_id),
            serde_json::to_string_pretty(&draft)?,
        )
        .await?;

        session.last_saved_at = Some(draft.saved_at);
        self.write_session(&session).await?;

        self.store.append_event(
            &DocumentEvent::new(
                session.document_id,
                DocumentEventType::DraftSaved,
                "Draft saved".to_string(),
            )
            .with_actor(session.reviewer.clone()),
        )?;

        Ok(session)
    }

    /// Commit the session: validate completeness, atomically replace the
    /// canonical set, mark the document verified.
    ///
    /// Reviewer-edited fields become overrides (confidence 100, the
    /// reviewer as author); untouched fields keep their extractor
    /// confidence. Fails with `IncompleteVerification` naming exactly the
    /// canonical keys that are missing or empty.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn commit(&self, session_id: Uuid) -> Result<Vec<ReconciledField>, SessionError> {
        let mut session = self.load(session_id).await?;
        if session.status == SessionStatus::Committed {
            return Err(SessionError::SessionCommitted);
        }

        let missing_fields: Vec<FieldKey> = FieldKey::all()
            .iter()
            .copied()
            .filter(|key| {
                session
                    .field(*key)
                    .map(|f| f.field.value.trim().is_empty())
                    .unwrap_or(true)
            })
            .collect();

        if !missing_fields.is_empty() {
            return Err(SessionError::IncompleteVerification { missing_fields });
        }

        let now = Utc::now();
        let committed: Vec<ReconciledField> = session
            .fields
            .iter()
            .map(|working| {
                if working.edited {
                    ReconciledField {
                        key: working.field.key,
                        value: working.field.value.clone(),
                        confidence: 100,
                        overridden: true,
                        override_author: Some(session.reviewer.clone()),
                        overridden_at: Some(now),
                    }
                } else {
                    working.field.clone()
                }
            })
            .collect();

        // The single atomic mutation point for canonical state.
        self.store
            .save_reconciled(session.document_id, &committed)
            .await?;

        session.status = SessionStatus::Committed;
        self.write_session(&session).await?;

        let draft_path = self.store.draft_path(session.document_id);
        if draft_path.exists() {
            fs::remove_file(&draft_path).await?;
        }

        self.store.append_event(
            &DocumentEvent::new(
                session.document_id,
                DocumentEventType::Verified,
                format!("Verification committed by {}", session.reviewer),
            )
            .with_actor(session.reviewer.clone())
            .with_payload(serde_json::json!({
                "session_id": session.id,
                "fields": committed.len(),
            })),
        )?;

        if let Some(registry_path) = &self.registry_path {
            self.update_registry(registry_path, &session, &committed)
                .await
                .map_err(|e| SessionError::Registry(e.to_string()))?;
        }

        info!(document_id = %session.document_id, "Session committed, document verified");

        Ok(committed)
    }

    /// Close without committing: the working copy is kept as a draft and
    /// exclusivity is released. The document stays `verifying`.
    pub async fn close(&self, session_id: Uuid) -> Result<(), SessionError> {
        let session = self.load(session_id).await?;
        self.close_session(session).await
    }

    /// Release a document's session by document id. Recovery path for
    /// a session left behind by a crashed process.
    pub async fn close_document(&self, document_id: Uuid) -> Result<(), SessionError> {
        let session = self
            .session_for_document(document_id)
            .await?
            .ok_or(SessionError::SessionNotFound(document_id))?;
        self.close_session(session).await
    }

    async fn close_session(&self, session: VerificationSession) -> Result<(), SessionError> {
        let session_path = self.store.session_path(session.document_id);

        if session.status == SessionStatus::Draft {
            let draft = SessionDraft {
                document_id: session.document_id,
                reviewer: session.reviewer.clone(),
                saved_at: Utc::now(),
                fields: session.fields.clone(),
            };
            fs::write(
                self.store.draft_path(session.document_id),
                serde_json::to_string_pretty(&draft)?,
            )
            .await?;

            self.store.append_event(
                &DocumentEvent::new(
                    session.document_id,
                    DocumentEventType::SessionClosed,
                    "Session closed; draft kept".to_string(),
                )
                .with_actor(session.reviewer.clone()),
            )?;
        }

        if session_path.exists() {
            fs::remove_file(&session_path).await?;
        }

        info!(session_id = %session.id, "Session closed");
        Ok(())
    }

    async fn write_session(&self, session: &VerificationSession) -> Result<(), SessionError> {
        fs::write(
            self.store.session_path(session.document_id),
            serde_json::to_string_pretty(session)?,
        )
        .await?;
        Ok(())
    }

    async fn load_draft(&self, document_id: Uuid) -> Result<Option<SessionDraft>, SessionError> {
        let path = self.store.draft_path(document_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn update_registry(
        &self,
        path: &Path,
        session: &VerificationSession,
        fields: &[ReconciledField],
    ) -> anyhow::Result<()> {
        let meta = self.store.load_meta(session.document_id).await?;

        let mut registry = Registry::load(path).await?;
        registry.add(VerifiedRecord {
            document_id: session.document_id,
            filename: meta.as_ref().map(|m| m.filename.clone()).unwrap_or_default(),
            kind: meta.and_then(|m| m.kind),
            verified_at: Utc::now(),
            verified_by: session.reviewer.clone(),
            fields: fields.to_vec(),
        });
        registry.save(path).await?;

        Ok(())
    }
}
