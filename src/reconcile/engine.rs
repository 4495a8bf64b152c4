//! Confidence reconciliation: collapsing extractor candidates into one
//! canonical value per field, and the human override path.
//!
//! `reconcile` is a pure function of its extracted input: the same
//! candidate set always yields the identical reconciled set. Overrides are
//! the only mutation path, and they go through the store.

use chrono::Utc;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    ConfidenceBand, DocumentEvent, DocumentEventType, ExtractedField, FieldKey, LifecycleState,
    ReconciledField,
};
use crate::store::{DocumentStore, StoreError};

/// Errors from the reconciliation engine
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    #[error("Document {0} has no reconciled field set yet")]
    NotReconciled(Uuid),

    #[error("Document is already verified; corrections require re-submission")]
    AlreadyVerified,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Result of reconciling one extraction run.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// One field per canonical key, in schema order
    pub fields: Vec<ReconciledField>,
    /// Unknown-key drops. Surfaced here and in logs, never as errors;
    /// recovery for a bad key is local.
    pub warnings: Vec<String>,
}

/// Collapse extracted candidates into the canonical field set.
///
/// Per key: highest confidence wins; ties break to the most recent
/// extraction timestamp. Keys outside the canonical schema are dropped
/// with a warning.
pub fn reconcile(extracted: &[ExtractedField]) -> ReconcileOutcome {
    let mut best: HashMap<FieldKey, &ExtractedField> = HashMap::new();
    let mut warnings = Vec::new();

    for candidate in extracted {
        let Some(key) = FieldKey::parse(&candidate.key) else {
            warn!(key = %candidate.key, "Dropping unknown field key");
            warnings.push(format!("unknown field key '{}' dropped", candidate.key));
            continue;
        };

        match best.get(&key) {
            Some(current)
                if (current.confidence, current.extracted_at)
                    >= (candidate.confidence, candidate.extracted_at) => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    // Emit in schema order so equal inputs yield byte-identical output.
    let fields = FieldKey::all()
        .iter()
        .filter_map(|key| {
            best.get(key).map(|candidate| ReconciledField {
                key: *key,
                value: candidate.value.clone(),
                confidence: candidate.confidence.min(100),
                overridden: false,
                override_author: None,
                overridden_at: None,
            })
        })
        .collect();

    ReconcileOutcome { fields, warnings }
}

/// Replace a reconciled field value with a human-provided one.
///
/// Sets confidence to 100 and records the author and timestamp; a field
/// absent from the canonical set is created. Refused once the document is
/// verified.
pub async fn apply_override(
    store: &DocumentStore,
    document_id: Uuid,
    key: FieldKey,
    value: impl Into<String>,
    author: impl Into<String>,
) -> Result<ReconciledField, ReconcileError> {
    let document = match store.document(document_id).await {
        Ok(doc) => doc,
        Err(StoreError::DocumentNotFound(id)) => return Err(ReconcileError::DocumentNotFound(id)),
        Err(e) => return Err(e.into()),
    };

    if document.state == LifecycleState::Verified {
        return Err(ReconcileError::AlreadyVerified);
    }

    let mut fields = store
        .load_reconciled(document_id)
        .await?
        .ok_or(ReconcileError::NotReconciled(document_id))?;

    let author = author.into();
    let field = ReconciledField {
        key,
        value: value.into(),
        confidence: 100,
        overridden: true,
        override_author: Some(author.clone()),
        overridden_at: Some(Utc::now()),
    };

    match fields.iter_mut().find(|f| f.key == key) {
        Some(existing) => *existing = field.clone(),
        None => {
            fields.push(field.clone());
            fields.sort_by_key(|f| f.key);
        }
    }

    store.save_reconciled(document_id, &fields).await?;

    store.append_event(
        &DocumentEvent::new(
            document_id,
            DocumentEventType::OverrideApplied,
            format!("Field '{}' overridden", key),
        )
        .with_actor(author.clone())
        .with_payload(serde_json::json!({ "field": key })),
    )?;

    info!(%document_id, field = %key, %author, "Override applied");

    Ok(field)
}

/// Aggregate confidence across the reconciled set (rounded mean).
pub fn overall_confidence(fields: &[ReconciledField]) -> u8 {
    if fields.is_empty() {
        return 0;
    }
    let sum: u32 = fields.iter().map(|f| f.confidence as u32).sum();
    ((sum + fields.len() as u32 / 2) / fields.len() as u32) as u8
}

/// Per-band field counts, for review flagging and reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BandCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

pub fn band_counts(fields: &[ReconciledField]) -> BandCounts {
    let mut counts = BandCounts::default();
    for field in fields {
        match field.band() {
            ConfidenceBand::High => counts.high += 1,
            ConfidenceBand::Medium => counts.medium += 1,
            ConfidenceBand::Low => counts.low += 1,
        }
    }
    counts
}
