//! Intake Integration Tests
//!
//! Format, size, and capacity enforcement, plus the end-to-end worked
//! example: submit → extract → override → commit → verified.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use common::{pdf, submit_pdf, temp_store, ScriptedBackend};
use keiyaku::domain::{ConfidenceBand, FieldKey, LifecycleState};
use keiyaku::extract::{ExtractTimeouts, ExtractionPipeline};
use keiyaku::ingest::{IngestError, IngestLimits, IngestQueue, SubmitMeta};
use keiyaku::reconcile;
use keiyaku::verify::{SessionError, SessionManager};

#[tokio::test]
async fn test_validation_order_format_then_size_then_capacity() {
    let temp = TempDir::new().unwrap();
    let queue = IngestQueue::new(temp_store(&temp)).with_limits(IngestLimits {
        max_document_bytes: 32,
        max_in_flight: 1,
    });

    // A file that is wrong on every count still reports the format error
    let err = queue
        .submit(
            &vec![b'x'; 100],
            SubmitMeta {
                filename: "huge.docx".to_string(),
                kind: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat { .. }));

    // Valid format, too large
    let err = queue
        .submit(
            &pdf(&"x".repeat(64)),
            SubmitMeta {
                filename: "big.pdf".to_string(),
                kind: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::SizeLimitExceeded { .. }));

    // Fill the queue, then capacity trips
    submit_pdf(&queue, "first.pdf", "a").await;
    let err = queue
        .submit(
            &pdf("b"),
            SubmitMeta {
                filename: "second.pdf".to_string(),
                kind: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::QueueCapacityExceeded { .. }));
}

#[tokio::test]
async fn test_verified_documents_free_queue_capacity() {
    let temp = TempDir::new().unwrap();
    let store = temp_store(&temp);
    let queue = IngestQueue::new(store.clone()).with_limits(IngestLimits {
        max_document_bytes: 1024,
        max_in_flight: 1,
    });

    let id = submit_pdf(&queue, "first.pdf", "a").await;

    // Extraction completes, so the document is no longer in flight
    let backend = ScriptedBackend::new("text").with_all_fields(90);
    ExtractionPipeline::new(
        store.clone(),
        Arc::new(backend),
        ExtractTimeouts {
            recognize: Duration::from_secs(5),
            field: Duration::from_secs(5),
        },
    )
    .extract(id)
    .await
    .unwrap();

    submit_pdf(&queue, "second.pdf", "b").await;
}

#[tokio::test]
async fn test_worked_example_submit_to_verified() {
    let temp = TempDir::new().unwrap();
    let store = temp_store(&temp);
    let queue = IngestQueue::new(store.clone());

    // Submit
    let id = submit_pdf(&queue, "sakura_heights.pdf", "賃貸借契約書").await;
    assert_eq!(queue.status(id).await.unwrap(), LifecycleState::Queued);

    // Extract three fields with the scripted confidences
    let backend = ScriptedBackend::new("契約番号 C-2025-001 賃料 ¥500,000")
        .with_candidate(FieldKey::ContractNumber, "C-2025-001", 98)
        .with_candidate(FieldKey::MonthlyRent, "¥500,000", 99)
        .with_candidate(FieldKey::LessorPhone, "03-1234-5678", 65);
    let outcome = ExtractionPipeline::new(
        store.clone(),
        Arc::new(backend),
        ExtractTimeouts {
            recognize: Duration::from_secs(5),
            field: Duration::from_secs(5),
        },
    )
    .extract(id)
    .await
    .unwrap();

    // Reconciliation preserves values and confidences
    let reconciled = &outcome.reconciled;
    assert_eq!(reconciled.len(), 3);
    let contract = reconciled
        .iter()
        .find(|f| f.key == FieldKey::ContractNumber)
        .unwrap();
    assert_eq!(contract.value, "C-2025-001");
    assert_eq!(contract.confidence, 98);
    assert_eq!(contract.band(), ConfidenceBand::High);

    let phone = reconciled
        .iter()
        .find(|f| f.key == FieldKey::LessorPhone)
        .unwrap();
    assert_eq!(phone.confidence, 65);
    assert_eq!(phone.band(), ConfidenceBand::Low);

    // The low-confidence phone gets overridden by a reviewer
    let updated = reconcile::apply_override(&store, id, FieldKey::LessorPhone, "03-1234-5678", "reviewer1")
        .await
        .unwrap();
    assert_eq!(updated.confidence, 100);

    // Commit fails naming exactly the canonical fields still missing
    let manager = SessionManager::new(store.clone());
    let session = manager.open(id, "reviewer1").await.unwrap();
    let err = manager.commit(session.id).await.unwrap_err();
    let missing = match err {
        SessionError::IncompleteVerification { missing_fields } => missing_fields,
        other => panic!("expected IncompleteVerification, got {}", other),
    };
    assert_eq!(missing.len(), FieldKey::all().len() - 3);
    assert!(!missing.contains(&FieldKey::ContractNumber));
    assert!(!missing.contains(&FieldKey::MonthlyRent));
    assert!(!missing.contains(&FieldKey::LessorPhone));

    // Fill in what the extractor could not read, then commit
    for key in missing {
        manager
            .edit_field(session.id, key, &format!("manual-{}", key.as_str()))
            .await
            .unwrap();
    }
    manager.commit(session.id).await.unwrap();

    let document = store.document(id).await.unwrap();
    assert_eq!(document.state, LifecycleState::Verified);
}

#[tokio::test]
async fn test_submit_records_meta_and_digest() {
    let temp = TempDir::new().unwrap();
    let store = temp_store(&temp);
    let queue = IngestQueue::new(store.clone());

    let receipt = queue
        .submit(
            &pdf("contract body"),
            SubmitMeta {
                filename: "lease.pdf".to_string(),
                kind: Some(keiyaku::domain::ContractKind::Lease),
            },
        )
        .await
        .unwrap();

    let meta = store.load_meta(receipt.document_id).await.unwrap().unwrap();
    assert_eq!(meta.filename, "lease.pdf");
    assert_eq!(meta.digest, receipt.digest);
    assert_eq!(meta.kind, Some(keiyaku::domain::ContractKind::Lease));

    // Original bytes round-trip
    let original = store.read_original(receipt.document_id).await.unwrap();
    assert_eq!(original, pdf("contract body"));
}
