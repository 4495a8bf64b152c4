//! Verification session subcommands.

use anyhow::{Context, Result};
use clap::Subcommand;
use uuid::Uuid;

use crate::config;
use crate::domain::FieldKey;
use crate::store::DocumentStore;
use crate::verify::{SessionManager, SessionStatus, VerificationSession};

#[derive(Subcommand, Debug)]
pub enum VerifyCommands {
    /// Open a verification session on a document
    Open {
        /// Document ID (UUID)
        document_id: String,

        /// Reviewer name recorded on overrides and the audit log
        #[arg(short, long)]
        reviewer: String,
    },

    /// Edit a field in an open session
    Edit {
        /// Session ID (UUID)
        session_id: String,

        /// Field key (e.g. monthly_rent)
        field: String,

        /// New value
        value: String,
    },

    /// Save the session's working copy as a draft
    Save {
        /// Session ID (UUID)
        session_id: String,
    },

    /// Commit the session: validate, replace the canonical set, verify
    Commit {
        /// Session ID (UUID)
        session_id: String,
    },

    /// Close the session without committing (keeps a draft)
    Close {
        /// Session ID (UUID)
        session_id: String,
    },

    /// Show the session currently open on a document
    Show {
        /// Document ID (UUID)
        document_id: String,
    },

    /// Release a stale session by document ID (e.g. after a crash)
    Release {
        /// Document ID (UUID)
        document_id: String,
    },
}

/// Execute verify subcommands
pub async fn execute(command: VerifyCommands) -> Result<()> {
    let store = DocumentStore::open_default().await?;
    let manager = SessionManager::new(store).with_registry(config::registry_path()?);

    match command {
        VerifyCommands::Open {
            document_id,
            reviewer,
        } => {
            let document_id = parse_id(&document_id, "document")?;
            let session = manager.open(document_id, reviewer).await?;

            println!("Session opened: {}", session.id);
            print_session(&session);
            Ok(())
        }
        VerifyCommands::Edit {
            session_id,
            field,
            value,
        } => {
            let session_id = parse_id(&session_id, "session")?;
            let key = FieldKey::parse(&field)
                .with_context(|| format!("Unknown field key: {}", field))?;

            let session = manager.edit_field(session_id, key, value).await?;
            let edited = session
                .field(key)
                .map(|f| f.field.value.clone())
                .unwrap_or_default();
            println!("Set {} = '{}'", key.as_str(), edited);
            Ok(())
        }
        VerifyCommands::Save { session_id } => {
            let session_id = parse_id(&session_id, "session")?;
            let session = manager.save_draft(session_id).await?;
            println!(
                "Draft saved for document {} at {}",
                session.document_id,
                session.last_saved_at.map(|t| t.to_string()).unwrap_or_default()
            );
            Ok(())
        }
        VerifyCommands::Commit { session_id } => {
            let session_id = parse_id(&session_id, "session")?;
            let fields = manager.commit(session_id).await?;

            let overridden = fields.iter().filter(|f| f.overridden).count();
            println!(
                "Committed: {} fields verified ({} overridden)",
                fields.len(),
                overridden
            );
            Ok(())
        }
        VerifyCommands::Close { session_id } => {
            let session_id = parse_id(&session_id, "session")?;
            manager.close(session_id).await?;
            println!("Session closed; draft kept for the next reviewer");
            Ok(())
        }
        VerifyCommands::Show { document_id } => {
            let document_id = parse_id(&document_id, "document")?;
            match manager.session_for_document(document_id).await? {
                Some(session) => {
                    print_session(&session);
                    Ok(())
                }
                None => {
                    println!("No session open on document {}", document_id);
                    Ok(())
                }
            }
        }
        VerifyCommands::Release { document_id } => {
            let document_id = parse_id(&document_id, "document")?;
            manager.close_document(document_id).await?;
            println!("Session released on document {}", document_id);
            Ok(())
        }
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {} ID: {}", what, raw))
}

fn print_session(session: &VerificationSession) {
    println!("Session:  {}", session.id);
    println!("Document: {}", session.document_id);
    println!("Reviewer: {}", session.reviewer);
    println!(
        "Status:   {}",
        match session.status {
            SessionStatus::Draft => "draft",
            SessionStatus::Committed => "committed",
        }
    );
    println!("Opened:   {}", session.opened_at);
    println!();
    println!("{:<22} {:>5} {:<7} VALUE", "FIELD", "CONF", "EDITED");
    println!("{}", "-".repeat(70));
    for working in &session.fields {
        println!(
            "{:<22} {:>5} {:<7} {}",
            working.field.key.as_str(),
            working.field.confidence,
            if working.edited { "yes" } else { "" },
            working.field.value
        );
    }
}
