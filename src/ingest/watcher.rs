//! Inbox directory watcher.
//!
//! Watches a drop directory for new contract PDFs and submits them once
//! they are stable (scanner or sync still writing means the size keeps
//! changing). Scans are idempotent across restarts: a file whose content
//! digest is already in the store is skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::{DateTime, Utc};
use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::queue::{content_digest, IngestQueue, SubmitMeta};

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Inbox directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for the inbox watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory to watch for incoming PDFs
    pub inbox_path: PathBuf,

    /// How long a file must be unchanged before submission (seconds)
    pub stability_delay_secs: u64,

    /// Filename glob patterns to skip (temp files, sync droppings)
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox_path: PathBuf::from("inbox"),
            stability_delay_secs: 5,
            ignore_patterns: vec![
                "~$*".to_string(),
                ".*".to_string(),
                "*.tmp".to_string(),
                "*.part".to_string(),
            ],
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.inbox_path.exists() {
            return Err(WatcherError::DirectoryNotFound(self.inbox_path.clone()));
        }
        Ok(())
    }

    fn is_ignored(&self, filename: &str) -> bool {
        self.ignore_patterns
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .any(|pattern| pattern.matches(filename))
    }
}

/// Event emitted when an inbox file has been submitted
#[derive(Debug, Clone)]
pub struct InboxFileEvent {
    pub path: PathBuf,
    pub document_id: Uuid,
    pub detected_at: DateTime<Utc>,
}

/// Inbox watcher with stability checking
pub struct InboxWatcher {
    config: WatcherConfig,
}

impl InboxWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Scan the inbox once and submit any stable, unseen PDFs.
    pub async fn scan_once(&self, queue: &IngestQueue) -> Result<ScanResult> {
        self.config.validate()?;

        let mut result = ScanResult::default();
        let stability_delay = Duration::from_secs(self.config.stability_delay_secs);

        let mut entries = tokio::fs::read_dir(&self.config.inbox_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !is_pdf_path(&path) {
                continue;
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            if self.config.is_ignored(&filename) {
                result.skipped_ignored += 1;
                continue;
            }

            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }

            // A recent mtime means the file may still be landing.
            let stable = metadata
                .modified()
                .ok()
                .and_then(|m| m.elapsed().ok())
                .map(|age| age >= stability_delay)
                .unwrap_or(false);
            if !stable {
                result.skipped_unstable += 1;
                continue;
            }

            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    result.errors += 1;
                    continue;
                }
            };

            match queue.digest_exists(&content_digest(&bytes)).await {
                Ok(true) => {
                    result.skipped_duplicate += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Digest lookup failed for {}: {}", path.display(), e);
                    result.errors += 1;
                    continue;
                }
            }

            match queue
                .submit(
                    &bytes,
                    SubmitMeta {
                        filename,
                        kind: None,
                    },
                )
                .await
            {
                Ok(receipt) => {
                    tracing::info!(
                        document_id = %receipt.document_id,
                        "Inbox file submitted: {}",
                        path.display()
                    );
                    result.submitted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to submit {}: {}", path.display(), e);
                    result.errors += 1;
                }
            }
        }

        Ok(result)
    }

    /// Watch the inbox and submit new stable files until stopped.
    pub async fn watch(
        &self,
        queue: Arc<IngestQueue>,
    ) -> Result<(mpsc::Receiver<InboxFileEvent>, WatchHandle)> {
        self.config.validate()?;

        let (event_tx, event_rx) = mpsc::channel::<InboxFileEvent>(100);
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = run_watcher(config, queue, event_tx, &mut stop_rx).await {
                tracing::error!("Inbox watcher error: {}", e);
            }
        });

        Ok((
            event_rx,
            WatchHandle {
                stop_tx,
                task: handle,
            },
        ))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// Result of a single inbox scan
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub submitted: usize,
    pub skipped_duplicate: usize,
    pub skipped_unstable: usize,
    pub skipped_ignored: usize,
    pub errors: usize,
}

fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// Internal watcher loop
async fn run_watcher(
    config: WatcherConfig,
    queue: Arc<IngestQueue>,
    event_tx: mpsc::Sender<InboxFileEvent>,
    stop_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    // Files being stabilized: path -> (size, last_seen)
    let mut pending: HashMap<PathBuf, (u64, Instant)> = HashMap::new();

    let (tx, rx) = std::sync::mpsc::channel();

    let mut debouncer = new_debouncer(Duration::from_secs(2), tx)?;
    debouncer
        .watcher()
        .watch(&config.inbox_path, RecursiveMode::NonRecursive)?;

    let stability_delay = Duration::from_secs(config.stability_delay_secs);

    tracing::info!("Watching {} for contract PDFs", config.inbox_path.display());

    loop {
        if stop_rx.try_recv().is_ok() {
            tracing::info!("Inbox watcher stopping...");
            break;
        }

        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                for event in events {
                    let path = event.path;

                    if !is_pdf_path(&path) {
                        continue;
                    }

                    let filename = path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if config.is_ignored(&filename) {
                        continue;
                    }

                    if let Ok(metadata) = std::fs::metadata(&path) {
                        if metadata.is_file() {
                            pending.insert(path, (metadata.len(), Instant::now()));
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Inbox watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                // Expected, continue to stability check
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Inbox watcher channel disconnected");
                break;
            }
        }

        // Promote files whose size held still for the whole delay.
        let now = Instant::now();
        let mut stable_files = Vec::new();

        for (path, (last_size, last_seen)) in pending.iter() {
            if now.duration_since(*last_seen) >= stability_delay {
                if let Ok(metadata) = std::fs::metadata(path) {
                    let current_size = metadata.len();
                    if current_size == *last_size && current_size > 0 {
                        stable_files.push(path.clone());
                    }
                }
            }
        }

        for path in stable_files {
            pending.remove(&path);

            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", path.display(), e);
                    continue;
                }
            };

            match queue.digest_exists(&content_digest(&bytes)).await {
                Ok(true) => {
                    tracing::debug!("Inbox file already ingested: {}", path.display());
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Digest lookup failed for {}: {}", path.display(), e);
                    continue;
                }
            }

            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            match queue
                .submit(
                    &bytes,
                    SubmitMeta {
                        filename,
                        kind: None,
                    },
                )
                .await
            {
                Ok(receipt) => {
                    tracing::info!(
                        document_id = %receipt.document_id,
                        "Inbox file submitted: {}",
                        path.display()
                    );
                    let _ = event_tx
                        .send(InboxFileEvent {
                            path,
                            document_id: receipt.document_id,
                            detected_at: Utc::now(),
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("Failed to submit {}: {}", path.display(), e);
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use filetime::FileTime;
    use tempfile::TempDir;

    fn backdate(path: &Path, seconds: i64) {
        let mtime = FileTime::from_unix_time(FileTime::now().unix_seconds() - seconds, 0);
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    fn test_setup(temp: &TempDir) -> (InboxWatcher, IngestQueue) {
        let inbox = temp.path().join("inbox");
        std::fs::create_dir_all(&inbox).unwrap();

        let watcher = InboxWatcher::new(WatcherConfig {
            inbox_path: inbox,
            stability_delay_secs: 5,
            ignore_patterns: vec!["~$*".to_string(), "*.tmp".to_string()],
        });
        let queue = IngestQueue::new(DocumentStore::new(temp.path().join("documents")));
        (watcher, queue)
    }

    #[test]
    fn test_ignore_patterns() {
        let config = WatcherConfig::default();
        assert!(config.is_ignored("~$lease.pdf"));
        assert!(config.is_ignored(".hidden.pdf"));
        assert!(config.is_ignored("upload.pdf.part"));
        assert!(config.is_ignored("partial.tmp"));
        assert!(!config.is_ignored("lease.pdf"));
    }

    #[tokio::test]
    async fn test_scan_once_submits_stable_pdfs() {
        let temp = TempDir::new().unwrap();
        let (watcher, queue) = test_setup(&temp);
        let inbox = &watcher.config().inbox_path;

        let lease = inbox.join("lease.pdf");
        let note = inbox.join("notes.txt");
        tokio::fs::write(&lease, b"%PDF-1.7\nlease").await.unwrap();
        tokio::fs::write(&note, b"not a contract").await.unwrap();
        backdate(&lease, 60);
        backdate(&note, 60);

        let result = watcher.scan_once(&queue).await.unwrap();
        assert_eq!(result.submitted, 1);
        assert_eq!(result.errors, 0);

        // Second scan skips by digest
        let result = watcher.scan_once(&queue).await.unwrap();
        assert_eq!(result.submitted, 0);
        assert_eq!(result.skipped_duplicate, 1);
    }

    #[tokio::test]
    async fn test_scan_once_skips_fresh_files() {
        let temp = TempDir::new().unwrap();
        let (watcher, queue) = test_setup(&temp);
        let inbox = &watcher.config().inbox_path;

        // Just written, mtime is now
        tokio::fs::write(inbox.join("landing.pdf"), b"%PDF-1.7\nx")
            .await
            .unwrap();

        let result = watcher.scan_once(&queue).await.unwrap();
        assert_eq!(result.submitted, 0);
        assert_eq!(result.skipped_unstable, 1);
    }

    #[tokio::test]
    async fn test_scan_once_skips_ignored_files() {
        let temp = TempDir::new().unwrap();
        let (watcher, queue) = test_setup(&temp);
        let inbox = &watcher.config().inbox_path;

        let locked = inbox.join("~$lease.pdf");
        tokio::fs::write(&locked, b"%PDF-1.7\nx").await.unwrap();
        backdate(&locked, 60);

        let result = watcher.scan_once(&queue).await.unwrap();
        assert_eq!(result.submitted, 0);
        assert_eq!(result.skipped_ignored, 1);
    }
}
