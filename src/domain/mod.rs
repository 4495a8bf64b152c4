//! Domain types for the contract-verification core.
//!
//! This module contains the core data structures:
//! - Fields: canonical schema, extracted/reconciled field values
//! - Document: identity and lifecycle state
//! - Events: immutable audit records of state changes

pub mod document;
pub mod events;
pub mod fields;

// Re-export commonly used types
pub use document::{Document, DocumentFormat, DocumentMeta, LifecycleState};
pub use events::{DocumentEvent, DocumentEventType};
pub use fields::{
    ConfidenceBand, ContractKind, ExtractedField, FieldGroup, FieldKey, ReconciledField,
    SourceSpan,
};
