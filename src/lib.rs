//! keiyaku - Lease-contract extraction and verification engine
//!
//! Backend core for managing Japanese real-estate lease contracts:
//! uploaded PDFs are queued, run through an OCR/LLM extractor, and the
//! candidate fields are reconciled into a canonical set that a human
//! reviewer verifies field by field before the contract is released.
//!
//! # Architecture
//!
//! The system is built around event sourcing:
//! - Every document carries an append-only event log
//! - Lifecycle state is derived by replaying events
//! - The lifecycle only moves forward; a failed re-extraction can never
//!   regress an already-extracted document
//!
//! # Modules
//!
//! - `ingest`: Intake queue and inbox watcher
//! - `extract`: Extraction pipeline and backend adapters
//! - `reconcile`: Confidence reconciliation over candidate fields
//! - `verify`: Verification sessions
//! - `registry`: Verified-records registry and reports
//! - `store`: Per-document filesystem store
//! - `domain`: Data structures (Document, DocumentEvent, FieldKey)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Submit a contract PDF
//! keiyaku submit lease.pdf --kind lease
//!
//! # Run extraction
//! keiyaku extract <document-id>
//!
//! # Verify
//! keiyaku verify open <document-id> --reviewer tanaka
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod extract;
pub mod ingest;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod verify;

// Re-export main types at crate root for convenience
pub use domain::{
    ConfidenceBand, ContractKind, Document, DocumentEvent, DocumentEventType, ExtractedField,
    FieldKey, LifecycleState, ReconciledField,
};
pub use extract::{ExtractionPipeline, ExtractorBackend, HttpExtractorBackend};
pub use ingest::{InboxWatcher, IngestQueue, WatcherConfig};
pub use registry::{Registry, VerifiedRecord};
pub use store::DocumentStore;
pub use verify::{SessionManager, VerificationSession};
