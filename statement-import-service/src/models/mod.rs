//! Domain models for statement-import-service.

#![allow(clippy::should_implement_trait)]

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Raw Import Records
// ============================================================================

/// One untyped record as it arrives from an upstream statement parser.
/// Every field is optional; nothing here is trusted until it has passed
/// through the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawImportRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    pub raw_text: Option<String>,
    /// Signed amount used by older statement formats; positive means credit.
    pub amount: Option<Decimal>,
    /// Legacy credit/debit tag ("CR"/"DR"); takes precedence over the sign.
    pub legacy_type: Option<String>,
    pub debit_amount: Option<Decimal>,
    pub credit_amount: Option<Decimal>,
    pub date: Option<String>,
    pub date_iso: Option<String>,
    pub bank_code: Option<String>,
    pub transaction_ref: Option<String>,
    pub account_number: Option<String>,
    pub transfer_type: Option<String>,
    pub person_name: Option<String>,
    pub upi_id: Option<String>,
    pub branch: Option<String>,
    pub store: Option<String>,
    pub commodity: Option<String>,
    pub stated_balance: Option<Decimal>,
}

// ============================================================================
// Canonical Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinancialCategory {
    Income,
    Expense,
    Transfer,
    Investment,
    Other,
}

impl FinancialCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
            Self::Investment => "investment",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "income" => Self::Income,
            "expense" => Self::Expense,
            "transfer" => Self::Transfer,
            "investment" => Self::Investment,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsingMethod {
    /// Every load-bearing field came straight from the raw record.
    Structured,
    /// The signed-amount or legacy-tag path produced the credit/debit split.
    Derived,
    /// At least one field (usually the date) had to be inferred.
    Inferred,
}

impl ParsingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Derived => "derived",
            Self::Inferred => "inferred",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "structured" => Self::Structured,
            "derived" => Self::Derived,
            _ => Self::Inferred,
        }
    }
}

/// Bank-supplied metadata carried through from the raw record. Nullable as a
/// whole and per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BankMetadata {
    pub bank_code: Option<String>,
    pub transaction_ref: Option<String>,
    pub account_number: Option<String>,
    pub transfer_type: Option<String>,
    pub person_name: Option<String>,
    pub upi_id: Option<String>,
    pub branch: Option<String>,
    pub store_name: Option<String>,
    pub commodity: Option<String>,
}

/// Data-quality flags set by the normalizer. Flagged records are kept, never
/// silently dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QualityFlags {
    pub is_partial_data: bool,
    pub has_invalid_date: bool,
    pub has_zero_amount: bool,
}

/// The normalized unit of the ledger. Owned by the pipeline run that created
/// it until persisted; afterwards mutated only through explicit store
/// operations.
#[derive(Debug, Clone)]
pub struct CanonicalTransaction {
    pub transaction_id: Uuid,
    pub owner_id: Uuid,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub credit_amount: Decimal,
    pub debit_amount: Decimal,
    pub category: FinancialCategory,
    pub category_id: Option<Uuid>,
    pub metadata: BankMetadata,
    pub flags: QualityFlags,
    pub parsing_method: ParsingMethod,
    pub parsing_confidence: f64,
    pub is_deleted: bool,
}

impl CanonicalTransaction {
    /// Merchant identifier used for categorization propagation and auto-pay
    /// grouping: store name first, UPI handle as the fallback.
    pub fn merchant_identifier(&self) -> Option<String> {
        if let Some(store) = &self.metadata.store_name {
            if !store.trim().is_empty() {
                return Some(store.trim().to_string());
            }
        }
        self.metadata
            .upi_id
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| format!("upi:{}", u.trim()))
    }
}

/// A transaction row as read back from the ledger.
#[derive(Debug, Clone, FromRow)]
pub struct PersistedTransaction {
    pub transaction_id: Uuid,
    pub owner_id: Uuid,
    pub description: String,
    pub transaction_date: NaiveDate,
    pub credit_amount: Decimal,
    pub debit_amount: Decimal,
    pub category: String,
    pub category_id: Option<Uuid>,
    pub bank_code: Option<String>,
    pub transaction_ref: Option<String>,
    pub account_number: Option<String>,
    pub transfer_type: Option<String>,
    pub person_name: Option<String>,
    pub upi_id: Option<String>,
    pub branch: Option<String>,
    pub store_name: Option<String>,
    pub commodity: Option<String>,
    pub is_partial_data: bool,
    pub has_invalid_date: bool,
    pub has_zero_amount: bool,
    pub parsing_method: String,
    pub parsing_confidence: f64,
    pub is_deleted: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<PersistedTransaction> for CanonicalTransaction {
    fn from(row: PersistedTransaction) -> Self {
        Self {
            transaction_id: row.transaction_id,
            owner_id: row.owner_id,
            description: row.description,
            transaction_date: row.transaction_date,
            credit_amount: row.credit_amount,
            debit_amount: row.debit_amount,
            category: FinancialCategory::from_str(&row.category),
            category_id: row.category_id,
            metadata: BankMetadata {
                bank_code: row.bank_code,
                transaction_ref: row.transaction_ref,
                account_number: row.account_number,
                transfer_type: row.transfer_type,
                person_name: row.person_name,
                upi_id: row.upi_id,
                branch: row.branch,
                store_name: row.store_name,
                commodity: row.commodity,
            },
            flags: QualityFlags {
                is_partial_data: row.is_partial_data,
                has_invalid_date: row.has_invalid_date,
                has_zero_amount: row.has_zero_amount,
            },
            parsing_method: ParsingMethod::from_str(&row.parsing_method),
            parsing_confidence: row.parsing_confidence,
            is_deleted: row.is_deleted,
        }
    }
}

// ============================================================================
// Statement Metadata
// ============================================================================

/// Per (owner, account, bank) statement record. One active record per import;
/// superseded by later imports, never mutated in place once finalized.
#[derive(Debug, Clone, FromRow)]
pub struct AccountStatementMetadata {
    pub statement_id: Uuid,
    pub owner_id: Uuid,
    pub account_number: String,
    pub bank_code: String,
    pub opening_balance: Decimal,
    pub closing_balance: Decimal,
    pub statement_start_date: NaiveDate,
    pub statement_end_date: NaiveDate,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
    pub transaction_count: i32,
    pub created_utc: DateTime<Utc>,
}

/// Statement-level declarations supplied by the caller alongside the raw
/// records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatementDeclaration {
    pub account_number: Option<String>,
    pub bank_code: Option<String>,
    pub opening_balance: Option<Decimal>,
    pub closing_balance: Option<Decimal>,
    pub statement_start_date: Option<NaiveDate>,
    pub statement_end_date: Option<NaiveDate>,
}

// ============================================================================
// Categories
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryType {
    Income,
    Expense,
}

impl CategoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "income" => Self::Income,
            _ => Self::Expense,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRecord {
    pub category_id: Uuid,
    /// None for shared default categories, which are read-only and global.
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub category_type: String,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub is_default: bool,
}

// ============================================================================
// Auto-Pay Patterns and Deadlines
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayFrequency {
    Daily,
    Weekly,
    Monthly,
}

impl PayFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "daily" => Self::Daily,
            "weekly" => Self::Weekly,
            _ => Self::Monthly,
        }
    }
}

/// A recurring payment pattern found by the detector. Transient: only the
/// materialized deadline is persisted.
#[derive(Debug, Clone)]
pub struct AutoPayPattern {
    pub merchant_identifier: String,
    pub title: String,
    pub amount: Decimal,
    pub frequency: PayFrequency,
    pub occurrence_count: u32,
    pub confidence: f64,
    pub last_transaction_date: NaiveDate,
}

#[derive(Debug, Clone, FromRow)]
pub struct Deadline {
    pub deadline_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub is_recurring: bool,
    pub frequency: Option<String>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

// ============================================================================
// Import Request / Result
// ============================================================================

/// Caller-facing options for one import call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ImportOptions {
    /// Force background categorization regardless of batch size.
    pub background_categorization: bool,
    /// Trusted re-import: skip the dedup pass against persisted history.
    /// Insert-time conflict handling still applies.
    pub skip_history_dedup: bool,
    /// Enable the AI fallback phase of categorization.
    pub ai_categorization: bool,
}

/// The validated import request.
#[derive(Debug, Clone, Validate)]
pub struct ImportRequest {
    pub owner_id: Uuid,
    #[validate(length(min = 1, message = "at least one record is required"))]
    pub records: Vec<RawImportRecord>,
    pub statement: Option<StatementDeclaration>,
    pub options: ImportOptions,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceValidation {
    pub is_valid: bool,
    pub is_first_import: bool,
    pub warning: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityCheck {
    pub has_gap: bool,
    pub gap_days: i64,
    pub last_end_date: Option<NaiveDate>,
}

/// Everything the caller learns about one import call.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub inserted: u64,
    pub duplicates: u64,
    pub credit_inserted: u64,
    pub debit_inserted: u64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub balance_validation: Option<BalanceValidation>,
    pub deadlines_created: u64,
    pub categorized_count: u64,
    /// Set when categorization was dispatched to a background task.
    pub background_task_id: Option<Uuid>,
}
