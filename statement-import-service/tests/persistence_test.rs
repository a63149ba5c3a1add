//! Persistence orchestrator behavior: fallback recovery and exact counts.

mod common;

use common::{credit_record, debit_record, import_request, spawn_pipeline};
use std::sync::atomic::Ordering;
use uuid::Uuid;

#[tokio::test]
async fn bulk_failure_falls_back_to_per_record_inserts() {
    let harness = spawn_pipeline(None);
    harness.ledger.fail_bulk_insert.store(true, Ordering::SeqCst);

    let summary = harness
        .pipeline
        .import_bank_statement(import_request(
            Uuid::new_v4(),
            vec![
                debit_record("Rent payment", 15000, "2024-03-01"),
                credit_record("Salary credit", 85000, "2024-03-01"),
                debit_record("Coffee", 250, "2024-03-02"),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(summary.inserted, 3);
    assert_eq!(summary.credit_inserted, 1);
    assert_eq!(summary.debit_inserted, 2);
    assert_eq!(harness.ledger.transactions().len(), 3);
}

#[tokio::test]
async fn fallback_tolerates_individual_duplicates() {
    let harness = spawn_pipeline(None);
    let owner = Uuid::new_v4();

    harness
        .pipeline
        .import_bank_statement(import_request(
            owner,
            vec![debit_record("Rent payment", 15000, "2024-03-01")],
        ))
        .await
        .unwrap();

    harness.ledger.fail_bulk_insert.store(true, Ordering::SeqCst);

    // Bypass history dedup so the duplicate reaches the insert path.
    let mut request = import_request(
        owner,
        vec![
            debit_record("Rent payment", 15000, "2024-03-01"),
            debit_record("Coffee", 250, "2024-03-02"),
        ],
    );
    request.options.skip_history_dedup = true;

    let summary = harness.pipeline.import_bank_statement(request).await.unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(harness.ledger.transactions().len(), 2);
}

#[tokio::test]
async fn credit_debit_split_is_exact() {
    let harness = spawn_pipeline(None);
    let records: Vec<_> = (0..10)
        .map(|i| {
            if i % 2 == 0 {
                credit_record(&format!("Credit {i}"), 100 + i, "2024-03-01")
            } else {
                debit_record(&format!("Debit {i}"), 100 + i, "2024-03-01")
            }
        })
        .collect();

    let summary = harness
        .pipeline
        .import_bank_statement(import_request(Uuid::new_v4(), records))
        .await
        .unwrap();

    assert_eq!(summary.inserted, 10);
    assert_eq!(summary.credit_inserted, 5);
    assert_eq!(summary.debit_inserted, 5);
}
