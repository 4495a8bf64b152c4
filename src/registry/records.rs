//! Registry of verified contracts.
//!
//! Simple JSON-based index over every committed verification, searchable
//! and rebuildable from the per-document stores.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use uuid::Uuid;

use crate::domain::{ContractKind, FieldKey, LifecycleState, ReconciledField};
use crate::store::DocumentStore;

/// Registry of all verified documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Registry format version
    pub version: u32,

    /// All verified records
    pub records: Vec<VerifiedRecord>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            version: 1,
            records: Vec::new(),
        }
    }

    /// Load the registry from disk
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read registry: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse registry JSON")
    }

    /// Save the registry to disk
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write registry: {}", path.display()))?;

        Ok(())
    }

    /// Add a record, replacing any prior record for the same document
    pub fn add(&mut self, record: VerifiedRecord) {
        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|r| r.document_id == record.document_id)
        {
            *existing = record;
        } else {
            self.records.push(record);
        }
    }

    /// Get a record by document id
    pub fn get(&self, document_id: Uuid) -> Option<&VerifiedRecord> {
        self.records.iter().find(|r| r.document_id == document_id)
    }

    /// Search records by query (case-insensitive substring match over
    /// filename and field values)
    pub fn search(&self, query: &str) -> Vec<&VerifiedRecord> {
        let query_lower = query.to_lowercase();

        self.records
            .iter()
            .filter(|record| {
                record.filename.to_lowercase().contains(&query_lower)
                    || record
                        .fields
                        .iter()
                        .any(|f| f.value.to_lowercase().contains(&query_lower))
            })
            .collect()
    }

    /// All records sorted by verification time (most recent first)
    pub fn list(&self, limit: Option<usize>) -> Vec<&VerifiedRecord> {
        let mut records: Vec<_> = self.records.iter().collect();
        records.sort_by(|a, b| b.verified_at.cmp(&a.verified_at));

        if let Some(limit) = limit {
            records.truncate(limit);
        }

        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rebuild the registry by scanning every verified document in the
    /// store. Recovery path for a lost or corrupted registry file.
    pub async fn rebuild(store: &DocumentStore) -> Result<Self> {
        let mut registry = Self::new();

        for document in store.list_documents().await? {
            if document.state != LifecycleState::Verified {
                continue;
            }
            let Some(fields) = store.load_reconciled(document.id).await? else {
                continue;
            };
            let meta = store.load_meta(document.id).await?;

            registry.add(VerifiedRecord {
                document_id: document.id,
                filename: document.filename.clone(),
                kind: meta.and_then(|m| m.kind),
                verified_at: document.verified_at.unwrap_or(document.updated_at),
                verified_by: String::new(),
                fields,
            });
        }

        Ok(registry)
    }

    /// Rent-roll report: one row per verified contract with its monetary
    /// fields, plus a total of the parseable monthly rents.
    pub fn rent_roll(&self) -> RentRoll {
        let mut rows = Vec::new();
        let mut total_monthly_rent: i64 = 0;

        for record in self.list(None) {
            let monthly_rent = record.field_value(FieldKey::MonthlyRent);
            if let Some(yen) = monthly_rent.as_deref().and_then(parse_yen) {
                total_monthly_rent += yen;
            }

            rows.push(RentRollRow {
                document_id: record.document_id,
                property_name: record
                    .field_value(FieldKey::PropertyName)
                    .unwrap_or_default(),
                lessee_name: record.field_value(FieldKey::LesseeName).unwrap_or_default(),
                monthly_rent: monthly_rent.unwrap_or_default(),
                common_fee: record.field_value(FieldKey::CommonFee).unwrap_or_default(),
                deposit: record.field_value(FieldKey::Deposit).unwrap_or_default(),
            });
        }

        RentRoll {
            rows,
            total_monthly_rent,
        }
    }
}

/// A single verified contract in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedRecord {
    pub document_id: Uuid,

    /// Original uploaded filename
    pub filename: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContractKind>,

    pub verified_at: DateTime<Utc>,

    /// Reviewer who committed the verification
    #[serde(default)]
    pub verified_by: String,

    /// The committed canonical field set
    pub fields: Vec<ReconciledField>,
}

impl VerifiedRecord {
    pub fn field_value(&self, key: FieldKey) -> Option<String> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.clone())
    }
}

/// Tabular rent-roll report over verified contracts
#[derive(Debug, Clone, Serialize)]
pub struct RentRoll {
    pub rows: Vec<RentRollRow>,
    pub total_monthly_rent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RentRollRow {
    pub document_id: Uuid,
    pub property_name: String,
    pub lessee_name: String,
    pub monthly_rent: String,
    pub common_fee: String,
    pub deposit: String,
}

/// Parse a yen amount out of a field value. Tolerates full-width and
/// half-width yen signs, comma grouping, and a trailing 円.
pub fn parse_yen(value: &str) -> Option<i64> {
    let cleaned: String = value
        .trim()
        .trim_start_matches(['¥', '￥'])
        .trim_end_matches('円')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    cleaned.parse().ok()
}
