//! Balance reconciliation.
//!
//! Checks the declared opening balance against the prior statement's closing
//! balance, surfaces day gaps between statements, and compares the declared
//! closing balance against the computed one after persistence. Nothing here
//! blocks an import; a hard mismatch is reported as an error alongside the
//! inserted rows.

use crate::models::{AccountStatementMetadata, BalanceValidation, ContinuityCheck};
use rust_decimal::Decimal;
use chrono::NaiveDate;
use tracing::warn;

/// Validate a declared opening balance against the prior statement.
pub fn validate_opening_balance(
    prior: Option<&AccountStatementMetadata>,
    declared_opening: Decimal,
    tolerance: Decimal,
    hard_threshold: Decimal,
) -> BalanceValidation {
    let Some(prior) = prior else {
        return BalanceValidation {
            is_valid: true,
            is_first_import: true,
            warning: None,
            error: None,
        };
    };

    let discrepancy = (declared_opening - prior.closing_balance).abs();

    if discrepancy <= tolerance {
        BalanceValidation {
            is_valid: true,
            is_first_import: false,
            warning: None,
            error: None,
        }
    } else if discrepancy < hard_threshold {
        BalanceValidation {
            is_valid: true,
            is_first_import: false,
            warning: Some(format!(
                "Opening balance {} differs from prior closing balance {} by {}",
                declared_opening, prior.closing_balance, discrepancy
            )),
            error: None,
        }
    } else {
        warn!(
            declared = %declared_opening,
            prior_closing = %prior.closing_balance,
            discrepancy = %discrepancy,
            "Opening balance mismatch beyond hard threshold"
        );
        BalanceValidation {
            is_valid: false,
            is_first_import: false,
            warning: None,
            error: Some(format!(
                "Opening balance {} differs from prior closing balance {} by {}, beyond the accepted threshold",
                declared_opening, prior.closing_balance, discrepancy
            )),
        }
    }
}

/// Day gap between the prior statement's end and the new statement's start.
/// Adjacent statements (new start the day after prior end) have no gap.
pub fn check_continuity(
    prior: Option<&AccountStatementMetadata>,
    new_start: NaiveDate,
) -> ContinuityCheck {
    let Some(prior) = prior else {
        return ContinuityCheck::default();
    };

    let gap_days = (new_start - prior.statement_end_date).num_days() - 1;
    ContinuityCheck {
        has_gap: gap_days > 0,
        gap_days: gap_days.max(0),
        last_end_date: Some(prior.statement_end_date),
    }
}

/// Compare the declared closing balance to the computed one. Returns a
/// warning message when the discrepancy exceeds the tolerance.
pub fn reconcile_closing(
    opening_balance: Decimal,
    total_credits: Decimal,
    total_debits: Decimal,
    declared_closing: Decimal,
    tolerance: Decimal,
) -> Option<String> {
    let computed = opening_balance + total_credits - total_debits;
    let discrepancy = (computed - declared_closing).abs();
    if discrepancy <= tolerance {
        None
    } else {
        Some(format!(
            "Computed closing balance {} differs from declared closing balance {} by {}",
            computed, declared_closing, discrepancy
        ))
    }
}
