//! Command-line interface for keiyaku.
//!
//! Provides commands for submitting contracts, running extraction,
//! inspecting fields, managing verification sessions, and reporting
//! over verified records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::config;
use crate::domain::{ConfidenceBand, ContractKind, FieldKey, LifecycleState};
use crate::extract::{ExtractTimeouts, ExtractionPipeline, HttpExtractorBackend};
use crate::ingest::{IngestLimits, IngestQueue, InboxWatcher, SubmitMeta, WatcherConfig};
use crate::reconcile;
use crate::registry::Registry;
use crate::store::DocumentStore;

pub mod verify;

/// keiyaku - Lease-contract extraction and verification engine
#[derive(Parser, Debug)]
#[command(name = "keiyaku")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a contract PDF for extraction
    Submit {
        /// Path to the PDF file
        file: PathBuf,

        /// Contract kind
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Check the status of a document
    Status {
        /// Document ID (UUID)
        document_id: String,
    },

    /// List recent documents
    Documents {
        /// Maximum number of documents to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Run extraction on a queued document
    Extract {
        /// Document ID (UUID)
        document_id: String,
    },

    /// Show the reconciled fields of a document
    Fields {
        /// Document ID (UUID)
        document_id: String,

        /// Only show fields in this confidence band
        #[arg(short, long, value_enum)]
        band: Option<BandArg>,
    },

    /// Override a reconciled field value
    Override {
        /// Document ID (UUID)
        document_id: String,

        /// Field key (e.g. monthly_rent)
        field: String,

        /// New value
        value: String,

        /// Who is making the override
        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Manage verification sessions
    Verify {
        #[command(subcommand)]
        command: verify::VerifyCommands,
    },

    /// Watch an inbox directory for incoming PDFs
    Watch {
        /// Inbox directory (defaults to the configured inbox)
        #[arg(short, long)]
        inbox: Option<PathBuf>,
    },

    /// Search verified contracts
    Search {
        /// Search query
        query: String,
    },

    /// Reports over verified contracts
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum ReportCommands {
    /// Rent roll: monetary fields per verified contract with totals
    RentRoll,

    /// Rebuild the registry from the document store
    Rebuild,
}

/// Contract kind for CLI (maps to ContractKind)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum KindArg {
    Lease,
    RenewalAgreement,
    Memorandum,
}

impl From<KindArg> for ContractKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::Lease => ContractKind::Lease,
            KindArg::RenewalAgreement => ContractKind::RenewalAgreement,
            KindArg::Memorandum => ContractKind::Memorandum,
        }
    }
}

/// Confidence band filter for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BandArg {
    High,
    Medium,
    Low,
}

impl From<BandArg> for ConfidenceBand {
    fn from(b: BandArg) -> Self {
        match b {
            BandArg::High => ConfidenceBand::High,
            BandArg::Medium => ConfidenceBand::Medium,
            BandArg::Low => ConfidenceBand::Low,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit { file, kind } => submit_document(&file, kind).await,
            Commands::Status { document_id } => show_status(&document_id).await,
            Commands::Documents { limit } => list_documents(limit).await,
            Commands::Extract { document_id } => extract_document(&document_id).await,
            Commands::Fields { document_id, band } => show_fields(&document_id, band).await,
            Commands::Override {
                document_id,
                field,
                value,
                author,
            } => override_field(&document_id, &field, &value, &author).await,
            Commands::Verify { command } => verify::execute(command).await,
            Commands::Watch { inbox } => watch_inbox(inbox).await,
            Commands::Search { query } => search_registry(&query).await,
            Commands::Report { command } => match command {
                ReportCommands::RentRoll => report_rent_roll().await,
                ReportCommands::Rebuild => report_rebuild().await,
            },
            Commands::Config => show_config().await,
        }
    }
}

/// Open the configured intake queue
async fn open_queue() -> Result<IngestQueue> {
    let store = DocumentStore::open_default().await?;
    let settings = config::ingest_settings()?;
    Ok(IngestQueue::new(store).with_limits(IngestLimits {
        max_document_bytes: settings.max_document_bytes,
        max_in_flight: settings.max_in_flight,
    }))
}

/// Build the extraction pipeline against the configured backend
async fn open_pipeline() -> Result<ExtractionPipeline> {
    let store = DocumentStore::open_default().await?;
    let backend = HttpExtractorBackend::from_config()?;
    let settings = config::extract_settings()?;

    Ok(ExtractionPipeline::new(
        store,
        Arc::new(backend),
        ExtractTimeouts {
            recognize: Duration::from_secs(settings.recognize_timeout_seconds),
            field: Duration::from_secs(settings.field_timeout_seconds),
        },
    ))
}

fn parse_document_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid document ID: {}", raw))
}

/// Submit a PDF file to the queue
async fn submit_document(file: &PathBuf, kind: Option<KindArg>) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());

    let queue = open_queue().await?;
    let receipt = queue
        .submit(
            &bytes,
            SubmitMeta {
                filename,
                kind: kind.map(Into::into),
            },
        )
        .await?;

    println!("Queued: {}", receipt.document_id);
    if receipt.duplicate {
        println!("Note: identical content was already submitted before");
    }

    Ok(())
}

/// Show the lifecycle status of a document
async fn show_status(document_id_str: &str) -> Result<()> {
    let document_id = parse_document_id(document_id_str)?;

    let store = DocumentStore::open_default().await?;
    let document = store.document(document_id).await?;

    println!("Document ID: {}", document.id);
    println!("Filename:    {}", document.filename);
    println!("Size:        {} bytes", document.byte_size);
    println!("Status:      {}", document.state.as_str());
    if let LifecycleState::Failed { ref error } = document.state {
        println!("Error:       {}", error);
    }
    println!("Uploaded:    {}", document.uploaded_at);
    if let Some(verified_at) = document.verified_at {
        println!("Verified:    {}", verified_at);
    }

    Ok(())
}

/// List recent documents
async fn list_documents(limit: usize) -> Result<()> {
    let queue = open_queue().await?;
    let documents = queue.list(Some(limit)).await?;

    if documents.is_empty() {
        println!("No documents found");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<12}", "DOCUMENT ID", "FILENAME", "STATUS");
    println!("{}", "-".repeat(82));

    for document in documents {
        println!(
            "{:<38} {:<30} {:<12}",
            document.id,
            document.filename,
            document.state.as_str()
        );
    }

    Ok(())
}

/// Run the extraction pipeline on a document
async fn extract_document(document_id_str: &str) -> Result<()> {
    let document_id = parse_document_id(document_id_str)?;

    let pipeline = open_pipeline().await?;
    let outcome = pipeline.extract(document_id).await?;

    println!(
        "Extraction complete: {} fields extracted, {} failed",
        outcome.record.fields.len(),
        outcome.record.failed.len()
    );

    for failure in &outcome.record.failed {
        println!("  failed {}: {}", failure.key.as_str(), failure.reason);
    }
    for warning in &outcome.warnings {
        println!("  warning: {}", warning);
    }

    let counts = reconcile::band_counts(&outcome.reconciled);
    println!(
        "Reconciled {} fields (high: {}, medium: {}, low: {}), overall confidence {}",
        outcome.reconciled.len(),
        counts.high,
        counts.medium,
        counts.low,
        reconcile::overall_confidence(&outcome.reconciled)
    );

    Ok(())
}

/// Show reconciled fields, optionally filtered by band
async fn show_fields(document_id_str: &str, band: Option<BandArg>) -> Result<()> {
    let document_id = parse_document_id(document_id_str)?;
    let band: Option<ConfidenceBand> = band.map(Into::into);

    let store = DocumentStore::open_default().await?;
    let fields = store
        .load_reconciled(document_id)
        .await?
        .context("Document has no reconciled fields yet; run extract first")?;

    println!(
        "{:<22} {:<12} {:>5}  {:<8} VALUE",
        "FIELD", "LABEL", "CONF", "BAND"
    );
    println!("{}", "-".repeat(80));

    for field in &fields {
        if let Some(filter) = band {
            if field.band() != filter {
                continue;
            }
        }

        let marker = if field.overridden { "*" } else { " " };
        println!(
            "{:<22} {:<12} {:>4}{} {:<8} {}",
            field.key.as_str(),
            field.key.label_ja(),
            field.confidence,
            marker,
            band_name(field.band()),
            field.value
        );
    }

    let counts = reconcile::band_counts(&fields);
    println!();
    println!(
        "Overall confidence: {} (high: {}, medium: {}, low: {})",
        reconcile::overall_confidence(&fields),
        counts.high,
        counts.medium,
        counts.low
    );

    Ok(())
}

fn band_name(band: ConfidenceBand) -> &'static str {
    match band {
        ConfidenceBand::High => "high",
        ConfidenceBand::Medium => "medium",
        ConfidenceBand::Low => "low",
    }
}

/// Apply a manual override to a reconciled field
async fn override_field(
    document_id_str: &str,
    field: &str,
    value: &str,
    author: &str,
) -> Result<()> {
    let document_id = parse_document_id(document_id_str)?;
    let key = FieldKey::parse(field)
        .with_context(|| format!("Unknown field key: {}", field))?;

    let store = DocumentStore::open_default().await?;
    let updated = reconcile::apply_override(&store, document_id, key, value, author).await?;

    println!(
        "Overrode {} to '{}' (confidence {})",
        updated.key.as_str(),
        updated.value,
        updated.confidence
    );

    Ok(())
}

/// Watch an inbox directory and submit new PDFs
async fn watch_inbox(inbox: Option<PathBuf>) -> Result<()> {
    let settings = config::ingest_settings()?;
    let inbox_path = inbox.unwrap_or(settings.inbox.clone());
    tokio::fs::create_dir_all(&inbox_path).await?;

    let watcher = InboxWatcher::new(WatcherConfig {
        inbox_path: inbox_path.clone(),
        stability_delay_secs: settings.stability_delay_secs,
        ignore_patterns: settings.ignore_patterns.clone(),
    });
    let queue = Arc::new(open_queue().await?);

    // Catch up on anything already sitting in the inbox.
    let scan = watcher.scan_once(&queue).await?;
    println!(
        "Initial scan: {} submitted, {} duplicates, {} unstable, {} ignored",
        scan.submitted, scan.skipped_duplicate, scan.skipped_unstable, scan.skipped_ignored
    );

    let (mut events, handle) = watcher.watch(queue).await?;
    println!("Watching {} (Ctrl-C to stop)", inbox_path.display());

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!("Queued {} from {}", event.document_id, event.path.display());
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping watcher...");
                handle.stop().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Search verified contracts
async fn search_registry(query: &str) -> Result<()> {
    let registry = Registry::load(&config::registry_path()?).await?;
    let results = registry.search(query);

    if results.is_empty() {
        println!("No verified contracts match '{}'", query);
        return Ok(());
    }

    println!("{:<38} {:<30} VERIFIED", "DOCUMENT ID", "FILENAME");
    println!("{}", "-".repeat(90));
    for record in results {
        println!(
            "{:<38} {:<30} {}",
            record.document_id, record.filename, record.verified_at
        );
    }

    Ok(())
}

/// Rent-roll report over verified contracts
async fn report_rent_roll() -> Result<()> {
    let registry = Registry::load(&config::registry_path()?).await?;
    let roll = registry.rent_roll();

    if roll.rows.is_empty() {
        println!("No verified contracts yet");
        return Ok(());
    }

    println!(
        "{:<24} {:<16} {:<12} {:<12} {:<12}",
        "PROPERTY", "LESSEE", "RENT", "COMMON FEE", "DEPOSIT"
    );
    println!("{}", "-".repeat(80));

    for row in &roll.rows {
        println!(
            "{:<24} {:<16} {:<12} {:<12} {:<12}",
            row.property_name, row.lessee_name, row.monthly_rent, row.common_fee, row.deposit
        );
    }

    println!();
    println!(
        "Total monthly rent (parseable): ¥{}",
        format_grouped(roll.total_monthly_rent)
    );

    Ok(())
}

/// Rebuild the registry from verified documents in the store
async fn report_rebuild() -> Result<()> {
    let store = DocumentStore::open_default().await?;
    let registry = Registry::rebuild(&store).await?;
    let path = config::registry_path()?;
    registry.save(&path).await?;

    println!(
        "Registry rebuilt: {} verified contract(s) -> {}",
        registry.len(),
        path.display()
    );
    Ok(())
}

fn format_grouped(amount: i64) -> String {
    let digits = amount.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("keiyaku configuration");
    println!();
    if let Some(ref path) = cfg.config_file {
        println!("Config file:  {}", path.display());
    } else {
        println!("Config file:  (none, using defaults)");
    }
    println!("Home:         {}", cfg.home.display());
    println!("Documents:    {}", cfg.home.join("documents").display());
    println!("Registry:     {}", cfg.home.join("registry.json").display());
    println!();
    println!("Ingest:");
    println!("  Inbox:             {}", cfg.ingest.inbox.display());
    println!("  Max size:          {} bytes", cfg.ingest.max_document_bytes);
    println!("  Max in flight:     {}", cfg.ingest.max_in_flight);
    println!("  Stability delay:   {}s", cfg.ingest.stability_delay_secs);
    println!();
    println!("Extract:");
    println!("  Backend URL:       {}", cfg.extract.backend_url);
    println!("  Recognize timeout: {}s", cfg.extract.recognize_timeout_seconds);
    println!("  Field timeout:     {}s", cfg.extract.field_timeout_seconds);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_grouped() {
        assert_eq!(format_grouped(0), "0");
        assert_eq!(format_grouped(500), "500");
        assert_eq!(format_grouped(500000), "500,000");
        assert_eq!(format_grouped(1200000), "1,200,000");
    }

    #[test]
    fn test_cli_parses_submit() {
        let cli = Cli::try_parse_from(["keiyaku", "submit", "lease.pdf", "--kind", "lease"])
            .unwrap();
        match cli.command {
            Commands::Submit { file, kind } => {
                assert_eq!(file, PathBuf::from("lease.pdf"));
                assert!(matches!(kind, Some(KindArg::Lease)));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_cli_parses_verify_subcommand() {
        let cli = Cli::try_parse_from([
            "keiyaku",
            "verify",
            "open",
            "4f8a1f8e-3f64-4b68-9d0e-1c2c3d4e5f60",
            "--reviewer",
            "tanaka",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Verify { .. }));
    }

    #[test]
    fn test_cli_parses_release_and_rebuild() {
        let cli = Cli::try_parse_from([
            "keiyaku",
            "verify",
            "release",
            "4f8a1f8e-3f64-4b68-9d0e-1c2c3d4e5f60",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Verify {
                command: verify::VerifyCommands::Release { .. }
            }
        ));

        let cli = Cli::try_parse_from(["keiyaku", "report", "rebuild"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Report {
                command: ReportCommands::Rebuild
            }
        ));
    }
}
