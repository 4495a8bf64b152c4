//! Document persistence: per-document directories, append-only event logs,
//! and atomic replacement of the canonical field set.

pub mod documents;

pub use documents::{DocumentStore, StoreError};
