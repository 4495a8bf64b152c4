//! Document intake: submission queue and inbox watcher.

pub mod queue;
pub mod watcher;

pub use queue::{
    content_digest, IngestError, IngestLimits, IngestQueue, SubmitMeta, SubmitReceipt,
};
pub use watcher::{InboxWatcher, ScanResult, WatchHandle, WatcherConfig, WatcherError};
