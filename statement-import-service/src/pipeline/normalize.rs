//! Record normalizer.
//!
//! Turns one untyped import record into a `CanonicalTransaction`. The policy
//! is lenient retention: a record is flagged rather than dropped, and the
//! only reason to discard one would be a date that survives no inference
//! step, which the wall-clock fallback makes impossible.

use crate::models::{
    BankMetadata, CanonicalTransaction, FinancialCategory, ParsingMethod, QualityFlags,
    RawImportRecord,
};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use uuid::Uuid;

const DESCRIPTION_PLACEHOLDER: &str = "Unknown transaction";

const MIN_VALID_YEAR: i32 = 2010;
const MAX_VALID_YEAR: i32 = 2030;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d/%m/%y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%m/%d/%Y",
];

/// Per-batch normalization state. `prior_valid_date` advances as records
/// resolve real dates, so an undated row inherits its neighbour's date.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub owner_id: Uuid,
    pub statement_start_date: Option<NaiveDate>,
    pub prior_valid_date: Option<NaiveDate>,
    pub today: NaiveDate,
}

impl NormalizeContext {
    pub fn new(owner_id: Uuid, statement_start_date: Option<NaiveDate>, today: NaiveDate) -> Self {
        Self {
            owner_id,
            statement_start_date,
            prior_valid_date: None,
            today,
        }
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    // ISO timestamps carry a time part the formats above do not expect.
    let date_part = trimmed.split('T').next().unwrap_or(trimmed);

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            if (MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
                return Some(date);
            }
        }
    }
    None
}

fn resolve_date(raw: &RawImportRecord, ctx: &NormalizeContext) -> (NaiveDate, bool) {
    if let Some(date) = raw.date_iso.as_deref().and_then(parse_date) {
        return (date, false);
    }
    if let Some(date) = raw.date.as_deref().and_then(parse_date) {
        return (date, false);
    }
    let inferred = ctx
        .prior_valid_date
        .or(ctx.statement_start_date)
        .unwrap_or(ctx.today);
    (inferred, true)
}

fn resolve_amounts(raw: &RawImportRecord) -> (Decimal, Decimal, bool) {
    let zero = Decimal::ZERO;
    let mut credit = raw.credit_amount.unwrap_or(zero).max(zero);
    let mut debit = raw.debit_amount.unwrap_or(zero).max(zero);
    let mut derived = false;

    if credit.is_zero() && debit.is_zero() {
        if let Some(amount) = raw.amount {
            derived = true;
            let magnitude = amount.abs();
            let tag = raw
                .legacy_type
                .as_deref()
                .map(|t| t.trim().to_ascii_uppercase());
            match tag.as_deref() {
                Some("CR") | Some("CREDIT") => credit = magnitude,
                Some("DR") | Some("DEBIT") => debit = magnitude,
                _ => {
                    if amount >= zero {
                        credit = magnitude;
                    } else {
                        debit = magnitude;
                    }
                }
            }
        }
    }

    (credit, debit, derived)
}

fn resolve_category(
    credit: Decimal,
    debit: Decimal,
    transfer_type: Option<&str>,
) -> FinancialCategory {
    // Outgoing transfers override the debit default. Interbank credits
    // (NEFT/RTGS/IMPS) stay Income so salary detection keeps working; this
    // heuristic cannot tell salaries from genuine inbound transfers and is
    // a known classification risk.
    if transfer_type.is_some() && debit > Decimal::ZERO {
        return FinancialCategory::Transfer;
    }
    if credit > Decimal::ZERO {
        FinancialCategory::Income
    } else if debit > Decimal::ZERO {
        FinancialCategory::Expense
    } else {
        FinancialCategory::Other
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Normalize one raw record. Never fails; quality problems surface as flags
/// and a reduced parsing confidence.
pub fn normalize(raw: &RawImportRecord, ctx: &mut NormalizeContext) -> CanonicalTransaction {
    let (date, date_inferred) = resolve_date(raw, ctx);
    if !date_inferred {
        ctx.prior_valid_date = Some(date);
    }

    let (credit, debit, amounts_derived) = resolve_amounts(raw);
    let has_zero_amount = credit.is_zero() && debit.is_zero();

    let (description, is_partial_data) = match non_empty(&raw.title).or(non_empty(&raw.description))
    {
        Some(text) => (text.to_string(), false),
        None => match non_empty(&raw.raw_text) {
            Some(text) => (text.to_string(), true),
            None => (DESCRIPTION_PLACEHOLDER.to_string(), true),
        },
    };

    let category = resolve_category(credit, debit, raw.transfer_type.as_deref());

    let parsing_method = if date_inferred {
        ParsingMethod::Inferred
    } else if amounts_derived {
        ParsingMethod::Derived
    } else {
        ParsingMethod::Structured
    };

    let mut confidence: f64 = 1.0;
    if date_inferred {
        confidence -= 0.3;
    }
    if has_zero_amount {
        confidence -= 0.2;
    }
    if is_partial_data {
        confidence -= 0.2;
    }
    if amounts_derived {
        confidence -= 0.1;
    }

    CanonicalTransaction {
        transaction_id: Uuid::new_v4(),
        owner_id: ctx.owner_id,
        description,
        transaction_date: date,
        credit_amount: credit,
        debit_amount: debit,
        category,
        category_id: None,
        metadata: BankMetadata {
            bank_code: raw.bank_code.clone(),
            transaction_ref: raw.transaction_ref.clone(),
            account_number: raw.account_number.clone(),
            transfer_type: raw.transfer_type.clone(),
            person_name: raw.person_name.clone(),
            upi_id: raw.upi_id.clone(),
            branch: raw.branch.clone(),
            store_name: raw.store.clone(),
            commodity: raw.commodity.clone(),
        },
        flags: QualityFlags {
            is_partial_data,
            has_invalid_date: date_inferred,
            has_zero_amount,
        },
        parsing_method,
        parsing_confidence: confidence.clamp(0.0, 1.0),
        is_deleted: false,
    }
}

/// Normalize a whole batch in input order.
pub fn normalize_batch(
    records: &[RawImportRecord],
    owner_id: Uuid,
    statement_start_date: Option<NaiveDate>,
    today: NaiveDate,
) -> Vec<CanonicalTransaction> {
    let mut ctx = NormalizeContext::new(owner_id, statement_start_date, today);
    records.iter().map(|raw| normalize(raw, &mut ctx)).collect()
}
