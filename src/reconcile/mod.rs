//! Confidence reconciliation engine.

pub mod engine;

pub use engine::{
    apply_override, band_counts, overall_confidence, reconcile, BandCounts, ReconcileError,
    ReconcileOutcome,
};
