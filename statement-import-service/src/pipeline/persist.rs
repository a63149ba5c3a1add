//! Batch persistence orchestrator.
//!
//! Chunks the insert set adaptively, commits chunks with bounded
//! concurrency, and absorbs uniqueness conflicts. A chunk whose bulk path
//! fails falls back to per-record inserts so one bad row cannot sink its
//! neighbours. Each chunk tracks its own credit/debit split, so aggregate
//! counts stay exact under partial failure.

use crate::models::CanonicalTransaction;
use crate::services::metrics::{record_duplicates, record_error};
use crate::services::store::{ConflictPolicy, InsertOutcome, TransactionStore};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

/// Adaptive chunk size: fewer round trips for bigger imports, capped so a
/// single statement never turns into one giant write.
pub fn chunk_size_for(total: usize) -> usize {
    if total <= 500 {
        100
    } else if total <= 2000 {
        250
    } else {
        500
    }
}

/// Aggregate result of persisting one insert set.
#[derive(Debug, Default, Clone)]
pub struct PersistOutcome {
    pub inserted: u64,
    pub duplicates: u64,
    pub credit_inserted: u64,
    pub debit_inserted: u64,
    /// Ids of the rows that actually landed, for downstream categorization.
    pub inserted_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    inserted_ids: Vec<Uuid>,
    duplicates: u64,
    credit_inserted: u64,
    debit_inserted: u64,
    errors: Vec<String>,
}

fn split_counts(chunk: &[CanonicalTransaction], inserted_ids: &HashSet<Uuid>) -> (u64, u64) {
    let mut credit = 0u64;
    let mut debit = 0u64;
    for txn in chunk {
        if !inserted_ids.contains(&txn.transaction_id) {
            continue;
        }
        if txn.credit_amount > Decimal::ZERO {
            credit += 1;
        } else if txn.debit_amount > Decimal::ZERO {
            debit += 1;
        }
    }
    (credit, debit)
}

async fn persist_chunk(store: &dyn TransactionStore, chunk: &[CanonicalTransaction]) -> ChunkOutcome {
    let mut outcome = ChunkOutcome::default();

    match store.create_many(chunk, ConflictPolicy::IgnoreDuplicates).await {
        Ok(inserted_ids) => {
            outcome.duplicates = (chunk.len() - inserted_ids.len()) as u64;
            let id_set: HashSet<Uuid> = inserted_ids.iter().copied().collect();
            let (credit, debit) = split_counts(chunk, &id_set);
            outcome.credit_inserted = credit;
            outcome.debit_inserted = debit;
            outcome.inserted_ids = inserted_ids;
        }
        Err(bulk_error) => {
            // Bulk path failed; retry the chunk row by row so individual
            // duplicate-key failures cannot abort the rest.
            warn!(
                chunk_size = chunk.len(),
                error = %bulk_error,
                "Bulk insert failed, falling back to per-record inserts"
            );
            record_error("bulk_insert_fallback");

            let mut id_set = HashSet::new();
            for txn in chunk {
                match store.insert_one(txn).await {
                    Ok(InsertOutcome::Inserted) => {
                        id_set.insert(txn.transaction_id);
                        outcome.inserted_ids.push(txn.transaction_id);
                    }
                    Ok(InsertOutcome::Duplicate) => outcome.duplicates += 1,
                    Err(e) => {
                        warn!(
                            transaction_id = %txn.transaction_id,
                            error = %e,
                            "Record dropped after per-record insert failure"
                        );
                        outcome
                            .errors
                            .push(format!("record {} not persisted: {}", txn.transaction_id, e));
                    }
                }
            }
            let (credit, debit) = split_counts(chunk, &id_set);
            outcome.credit_inserted = credit;
            outcome.debit_inserted = debit;
        }
    }

    outcome
}

/// Persist the insert set with bounded chunk concurrency.
pub async fn persist(
    store: &dyn TransactionStore,
    to_insert: &[CanonicalTransaction],
    concurrency: usize,
) -> PersistOutcome {
    if to_insert.is_empty() {
        return PersistOutcome::default();
    }

    let chunk_size = chunk_size_for(to_insert.len());
    let chunk_outcomes: Vec<ChunkOutcome> = stream::iter(to_insert.chunks(chunk_size))
        .map(|chunk| persist_chunk(store, chunk))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut outcome = PersistOutcome::default();
    for chunk in chunk_outcomes {
        outcome.inserted += chunk.inserted_ids.len() as u64;
        outcome.duplicates += chunk.duplicates;
        outcome.credit_inserted += chunk.credit_inserted;
        outcome.debit_inserted += chunk.debit_inserted;
        outcome.inserted_ids.extend(chunk.inserted_ids);
        outcome.errors.extend(chunk.errors);
    }

    record_duplicates("insert", outcome.duplicates);
    info!(
        attempted = to_insert.len(),
        inserted = outcome.inserted,
        duplicates = outcome.duplicates,
        chunk_size = chunk_size,
        "Persistence complete"
    );

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_size_scales_with_volume() {
        assert_eq!(chunk_size_for(1), 100);
        assert_eq!(chunk_size_for(500), 100);
        assert_eq!(chunk_size_for(501), 250);
        assert_eq!(chunk_size_for(2000), 250);
        assert_eq!(chunk_size_for(2001), 500);
        assert_eq!(chunk_size_for(100_000), 500);
    }
}
