//! Reconciliation Integration Tests
//!
//! Determinism of the canonical set, tie-breaking, unknown-key handling,
//! and override invariants against a real store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use common::{submit_pdf, temp_store, ScriptedBackend};
use keiyaku::domain::{ConfidenceBand, ExtractedField, FieldKey};
use keiyaku::extract::{ExtractTimeouts, ExtractionPipeline};
use keiyaku::ingest::IngestQueue;
use keiyaku::reconcile::{self, ReconcileError};

fn field(key: &str, value: &str, confidence: u8) -> ExtractedField {
    ExtractedField {
        key: key.to_string(),
        value: value.to_string(),
        confidence,
        span: None,
        extracted_at: Utc::now(),
    }
}

#[test]
fn test_reconcile_is_deterministic() {
    let extracted = vec![
        field("monthly_rent", "¥500,000", 99),
        field("contract_number", "C-2025-001", 98),
        field("monthly_rent", "¥480,000", 70),
        field("lessor_phone", "03-1234-5678", 65),
    ];

    let first = reconcile::reconcile(&extracted);
    let second = reconcile::reconcile(&extracted);

    let values: Vec<(FieldKey, String, u8)> = first
        .fields
        .iter()
        .map(|f| (f.key, f.value.clone(), f.confidence))
        .collect();
    let values_again: Vec<(FieldKey, String, u8)> = second
        .fields
        .iter()
        .map(|f| (f.key, f.value.clone(), f.confidence))
        .collect();

    assert_eq!(values, values_again);

    // Schema display order, not input order
    assert_eq!(first.fields[0].key, FieldKey::ContractNumber);
    assert_eq!(first.fields[1].key, FieldKey::LessorPhone);
    assert_eq!(first.fields[2].key, FieldKey::MonthlyRent);

    // Highest confidence won
    let rent = &first.fields[2];
    assert_eq!(rent.value, "¥500,000");
    assert_eq!(rent.confidence, 99);
}

#[test]
fn test_confidence_tie_goes_to_newer_extraction() {
    let older = Utc::now() - chrono::Duration::seconds(60);
    let newer = Utc::now();

    let mut a = field("deposit", "¥1,000,000", 80);
    a.extracted_at = older;
    let mut b = field("deposit", "¥1,100,000", 80);
    b.extracted_at = newer;

    // Same winner regardless of input ordering
    let forward = reconcile::reconcile(&[a.clone(), b.clone()]);
    let reverse = reconcile::reconcile(&[b, a]);

    assert_eq!(forward.fields[0].value, "¥1,100,000");
    assert_eq!(reverse.fields[0].value, "¥1,100,000");
}

#[test]
fn test_unknown_keys_dropped_with_warning() {
    let extracted = vec![
        field("contract_number", "C-1", 90),
        field("parking_lot_count", "3", 95),
    ];

    let outcome = reconcile::reconcile(&extracted);

    assert_eq!(outcome.fields.len(), 1);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("parking_lot_count"));
}

#[test]
fn test_camel_case_keys_canonicalized() {
    let extracted = vec![field("contractNumber", "C-1", 90)];

    let outcome = reconcile::reconcile(&extracted);
    assert_eq!(outcome.fields.len(), 1);
    assert_eq!(outcome.fields[0].key, FieldKey::ContractNumber);
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn test_override_always_yields_confidence_100() {
    let temp = TempDir::new().unwrap();
    let store = temp_store(&temp);
    let queue = IngestQueue::new(store.clone());
    let id = submit_pdf(&queue, "lease.pdf", "x").await;

    let backend =
        ScriptedBackend::new("text").with_candidate(FieldKey::LessorPhone, "03-1234-5678", 65);
    let pipeline = ExtractionPipeline::new(
        store.clone(),
        Arc::new(backend),
        ExtractTimeouts {
            recognize: Duration::from_secs(5),
            field: Duration::from_secs(5),
        },
    );
    pipeline.extract(id).await.unwrap();

    let updated =
        reconcile::apply_override(&store, id, FieldKey::LessorPhone, "03-9999-0000", "tanaka")
            .await
            .unwrap();

    assert_eq!(updated.confidence, 100);
    assert_eq!(updated.band(), ConfidenceBand::High);
    assert!(updated.overridden);
    assert_eq!(updated.override_author.as_deref(), Some("tanaka"));

    // Re-overriding updates value and author, never the key
    let again =
        reconcile::apply_override(&store, id, FieldKey::LessorPhone, "03-0000-1111", "suzuki")
            .await
            .unwrap();
    assert_eq!(again.key, FieldKey::LessorPhone);
    assert_eq!(again.confidence, 100);
    assert_eq!(again.override_author.as_deref(), Some("suzuki"));

    let reconciled = store.load_reconciled(id).await.unwrap().unwrap();
    let phones: Vec<_> = reconciled
        .iter()
        .filter(|f| f.key == FieldKey::LessorPhone)
        .collect();
    assert_eq!(phones.len(), 1);
    assert_eq!(phones[0].value, "03-0000-1111");
}

#[tokio::test]
async fn test_override_requires_reconciled_set() {
    let temp = TempDir::new().unwrap();
    let store = temp_store(&temp);
    let queue = IngestQueue::new(store.clone());
    let id = submit_pdf(&queue, "lease.pdf", "x").await;

    let err = reconcile::apply_override(&store, id, FieldKey::Deposit, "¥1", "tanaka")
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotReconciled(_)));
}
