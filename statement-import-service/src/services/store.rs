//! Collaborator interfaces over the persisted store.
//!
//! The pipeline only ever talks to these traits; `Database` provides the
//! Postgres implementation and the integration tests provide in-memory ones.
//! Each import call builds its collaborator set once and passes it by
//! reference through the pipeline; there is no process-wide cache state.

use crate::models::{
    AccountStatementMetadata, CanonicalTransaction, CategoryRecord, Deadline, PersistedTransaction,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;

/// How a bulk insert treats rows that violate the ledger uniqueness
/// constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Conflicting rows are silently skipped; the insert reports only the
    /// rows that landed.
    IgnoreDuplicates,
    /// Conflicting rows fail the whole operation.
    Strict,
}

/// Result of a single-row insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Identifier a category can be propagated along.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MerchantKey {
    Store(String),
    Person(String),
    Upi(String),
}

/// Credit/debit sums over a window of persisted rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct AmountTotals {
    pub credit_total: Decimal,
    pub debit_total: Decimal,
    pub count: i64,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Number of non-deleted transactions the owner has on file.
    async fn count_for_owner(&self, owner_id: Uuid) -> Result<i64, AppError>;

    /// Fetch persisted transactions inside a date window, deleted rows
    /// included so dedup keys can account for them.
    async fn find_in_window(
        &self,
        owner_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PersistedTransaction>, AppError>;

    /// Bulk insert. With `ConflictPolicy::IgnoreDuplicates` the returned ids
    /// are exactly the rows that landed; conflicting rows are absorbed.
    async fn create_many(
        &self,
        transactions: &[CanonicalTransaction],
        policy: ConflictPolicy,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Single-row insert that signals a duplicate key instead of erroring.
    async fn insert_one(&self, transaction: &CanonicalTransaction)
        -> Result<InsertOutcome, AppError>;

    /// Assign a category to a set of transactions in one operation.
    async fn assign_category(
        &self,
        owner_id: Uuid,
        transaction_ids: &[Uuid],
        category_id: Uuid,
    ) -> Result<u64, AppError>;

    /// Give every still-uncategorized transaction sharing the merchant key
    /// the same category. Returns the number of rows updated.
    async fn propagate_category(
        &self,
        owner_id: Uuid,
        key: &MerchantKey,
        category_id: Uuid,
    ) -> Result<u64, AppError>;

    /// Credit/debit sums for an account over a date window.
    async fn aggregate_window(
        &self,
        owner_id: Uuid,
        account_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AmountTotals, AppError>;

    /// Uncategorized rows created after the given instant. Used by the
    /// background categorization pass, which re-queries by time window
    /// rather than carrying an explicit id handoff.
    async fn find_uncategorized_since(
        &self,
        owner_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<PersistedTransaction>, AppError>;
}

#[async_trait]
pub trait StatementStore: Send + Sync {
    /// Most recent finalized statement for the account, if any.
    async fn latest_statement(
        &self,
        owner_id: Uuid,
        account_number: &str,
        bank_code: &str,
    ) -> Result<Option<AccountStatementMetadata>, AppError>;

    /// Record a new statement. Earlier records are superseded, not mutated.
    async fn create_statement(&self, statement: &AccountStatementMetadata) -> Result<(), AppError>;
}

#[async_trait]
pub trait DeadlineStore: Send + Sync {
    async fn list_recurring(&self, owner_id: Uuid) -> Result<Vec<Deadline>, AppError>;

    async fn create_deadline(&self, deadline: &Deadline) -> Result<(), AppError>;
}

#[async_trait]
pub trait CategoryLookup: Send + Sync {
    /// Categories visible to the owner: their own plus the shared defaults.
    async fn list_categories(&self, owner_id: Uuid) -> Result<Vec<CategoryRecord>, AppError>;
}
