//! Deduplication engine.
//!
//! Two passes: intra-batch, then against persisted history inside a date
//! window. Both are latency optimizations; the insert-time conflict target
//! on the ledger is the correctness backstop against racing imports.

use crate::models::{CanonicalTransaction, PersistedTransaction};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

/// Description prefix length shared with the ledger uniqueness index. Keys
/// built in memory and keys enforced by storage must never disagree on
/// string length.
pub const DESCRIPTION_KEY_LEN: usize = 50;

fn description_prefix(description: &str) -> String {
    description.chars().take(DESCRIPTION_KEY_LEN).collect()
}

/// Intra-batch key: description prefix, amounts and date. Amounts are
/// normalized so `350` and `350.00` compare equal.
pub fn batch_key(
    description: &str,
    credit: Decimal,
    debit: Decimal,
    date: NaiveDate,
) -> String {
    format!(
        "{}|{}|{}|{}",
        description_prefix(description),
        credit.normalize(),
        debit.normalize(),
        date
    )
}

fn history_key(
    owner_id: Uuid,
    description: &str,
    credit: Decimal,
    debit: Decimal,
    date: NaiveDate,
    transaction_ref: Option<&str>,
    account_number: Option<&str>,
    is_deleted: bool,
) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}",
        owner_id,
        description_prefix(description),
        credit.normalize(),
        debit.normalize(),
        date,
        transaction_ref.unwrap_or(""),
        account_number.unwrap_or(""),
        is_deleted
    )
}

/// Result of a dedup pass.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub to_insert: Vec<CanonicalTransaction>,
    pub duplicate_count: u64,
}

/// Remove duplicates inside one batch. First occurrence wins.
pub fn dedupe_batch(candidates: Vec<CanonicalTransaction>) -> DedupOutcome {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    let mut outcome = DedupOutcome::default();

    for candidate in candidates {
        let key = batch_key(
            &candidate.description,
            candidate.credit_amount,
            candidate.debit_amount,
            candidate.transaction_date,
        );
        if seen.insert(key) {
            outcome.to_insert.push(candidate);
        } else {
            outcome.duplicate_count += 1;
        }
    }

    debug!(
        kept = outcome.to_insert.len(),
        duplicates = outcome.duplicate_count,
        "Intra-batch dedup complete"
    );
    outcome
}

/// Date window to fetch persisted history for, padded by `window_days` on
/// both sides. `None` when the batch is empty.
pub fn history_window(
    candidates: &[CanonicalTransaction],
    window_days: i64,
) -> Option<(NaiveDate, NaiveDate)> {
    let min = candidates.iter().map(|c| c.transaction_date).min()?;
    let max = candidates.iter().map(|c| c.transaction_date).max()?;
    Some((
        min - Duration::days(window_days),
        max + Duration::days(window_days),
    ))
}

/// Remove candidates whose equivalent key already exists in persisted rows.
pub fn dedupe_against_history(
    candidates: Vec<CanonicalTransaction>,
    existing: &[PersistedTransaction],
) -> DedupOutcome {
    let persisted_keys: HashSet<String> = existing
        .iter()
        .map(|row| {
            history_key(
                row.owner_id,
                &row.description,
                row.credit_amount,
                row.debit_amount,
                row.transaction_date,
                row.transaction_ref.as_deref(),
                row.account_number.as_deref(),
                row.is_deleted,
            )
        })
        .collect();

    let mut outcome = DedupOutcome::default();
    for candidate in candidates {
        let key = history_key(
            candidate.owner_id,
            &candidate.description,
            candidate.credit_amount,
            candidate.debit_amount,
            candidate.transaction_date,
            candidate.metadata.transaction_ref.as_deref(),
            candidate.metadata.account_number.as_deref(),
            candidate.is_deleted,
        );
        if persisted_keys.contains(&key) {
            outcome.duplicate_count += 1;
        } else {
            outcome.to_insert.push(candidate);
        }
    }

    debug!(
        kept = outcome.to_insert.len(),
        duplicates = outcome.duplicate_count,
        "History dedup complete"
    );
    outcome
}
