//! Shared in-memory collaborators for pipeline integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use statement_import_service::config::PipelineConfig;
use statement_import_service::models::{
    AccountStatementMetadata, CanonicalTransaction, CategoryRecord, Deadline, ImportOptions,
    ImportRequest, PersistedTransaction, RawImportRecord, StatementDeclaration,
};
use statement_import_service::pipeline::{Collaborators, ImportPipeline};
use statement_import_service::services::audit::AuditSink;
use statement_import_service::services::classifier::{
    ClassifyRequest, ClassifyResult, TransactionClassifier,
};
use statement_import_service::services::resolver::{EntityKind, NameResolver};
use statement_import_service::services::store::{
    AmountTotals, CategoryLookup, ConflictPolicy, DeadlineStore, InsertOutcome, MerchantKey,
    StatementStore, TransactionStore,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// In-memory ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    transactions: Vec<PersistedTransaction>,
    statements: Vec<AccountStatementMetadata>,
    deadlines: Vec<Deadline>,
    categories: Vec<CategoryRecord>,
    history_queries: Vec<(NaiveDate, NaiveDate)>,
}

/// In-memory store implementing every collaborator interface, with the same
/// conflict key the Postgres index enforces.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    /// When set, `create_many` fails so tests can exercise the per-record
    /// fallback path.
    pub fail_bulk_insert: AtomicBool,
}

fn conflict_key(
    owner_id: Uuid,
    description: &str,
    credit: Decimal,
    debit: Decimal,
    date: NaiveDate,
) -> String {
    let prefix: String = description.chars().take(50).collect();
    format!(
        "{owner_id}|{prefix}|{}|{}|{date}",
        credit.normalize(),
        debit.normalize()
    )
}

fn to_row(t: &CanonicalTransaction) -> PersistedTransaction {
    PersistedTransaction {
        transaction_id: t.transaction_id,
        owner_id: t.owner_id,
        description: t.description.clone(),
        transaction_date: t.transaction_date,
        credit_amount: t.credit_amount,
        debit_amount: t.debit_amount,
        category: t.category.as_str().to_string(),
        category_id: t.category_id,
        bank_code: t.metadata.bank_code.clone(),
        transaction_ref: t.metadata.transaction_ref.clone(),
        account_number: t.metadata.account_number.clone(),
        transfer_type: t.metadata.transfer_type.clone(),
        person_name: t.metadata.person_name.clone(),
        upi_id: t.metadata.upi_id.clone(),
        branch: t.metadata.branch.clone(),
        store_name: t.metadata.store_name.clone(),
        commodity: t.metadata.commodity.clone(),
        is_partial_data: t.flags.is_partial_data,
        has_invalid_date: t.flags.has_invalid_date,
        has_zero_amount: t.flags.has_zero_amount,
        parsing_method: t.parsing_method.as_str().to_string(),
        parsing_confidence: t.parsing_confidence,
        is_deleted: t.is_deleted,
        created_utc: Utc::now(),
    }
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_categories(categories: Vec<CategoryRecord>) -> Arc<Self> {
        let ledger = Self::default();
        ledger.state.lock().unwrap().categories = categories;
        Arc::new(ledger)
    }

    pub fn seed_statement(&self, statement: AccountStatementMetadata) {
        self.state.lock().unwrap().statements.push(statement);
    }

    pub fn seed_deadline(&self, deadline: Deadline) {
        self.state.lock().unwrap().deadlines.push(deadline);
    }

    pub fn transactions(&self) -> Vec<PersistedTransaction> {
        self.state.lock().unwrap().transactions.clone()
    }

    pub fn statements(&self) -> Vec<AccountStatementMetadata> {
        self.state.lock().unwrap().statements.clone()
    }

    pub fn deadlines(&self) -> Vec<Deadline> {
        self.state.lock().unwrap().deadlines.clone()
    }

    pub fn categories(&self) -> Vec<CategoryRecord> {
        self.state.lock().unwrap().categories.clone()
    }

    /// Date ranges `find_in_window` was asked for, in call order.
    pub fn history_queries(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.state.lock().unwrap().history_queries.clone()
    }

    pub fn category_id(&self, name: &str) -> Uuid {
        self.categories()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.category_id)
            .unwrap_or_else(|| panic!("category {name} not seeded"))
    }

    fn insert_row(&self, transaction: &CanonicalTransaction) -> InsertOutcome {
        let mut state = self.state.lock().unwrap();
        let key = conflict_key(
            transaction.owner_id,
            &transaction.description,
            transaction.credit_amount,
            transaction.debit_amount,
            transaction.transaction_date,
        );
        let exists = state.transactions.iter().any(|row| {
            !row.is_deleted
                && conflict_key(
                    row.owner_id,
                    &row.description,
                    row.credit_amount,
                    row.debit_amount,
                    row.transaction_date,
                ) == key
        });
        if exists {
            InsertOutcome::Duplicate
        } else {
            state.transactions.push(to_row(transaction));
            InsertOutcome::Inserted
        }
    }
}

#[async_trait]
impl TransactionStore for MemoryLedger {
    async fn count_for_owner(&self, owner_id: Uuid) -> Result<i64, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.owner_id == owner_id && !t.is_deleted)
            .count() as i64)
    }

    async fn find_in_window(
        &self,
        owner_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PersistedTransaction>, AppError> {
        let mut state = self.state.lock().unwrap();
        state.history_queries.push((start, end));
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                t.owner_id == owner_id && t.transaction_date >= start && t.transaction_date <= end
            })
            .cloned()
            .collect())
    }

    async fn create_many(
        &self,
        transactions: &[CanonicalTransaction],
        _policy: ConflictPolicy,
    ) -> Result<Vec<Uuid>, AppError> {
        if self.fail_bulk_insert.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "simulated bulk insert failure"
            )));
        }
        let mut inserted = Vec::new();
        for transaction in transactions {
            if self.insert_row(transaction) == InsertOutcome::Inserted {
                inserted.push(transaction.transaction_id);
            }
        }
        Ok(inserted)
    }

    async fn insert_one(
        &self,
        transaction: &CanonicalTransaction,
    ) -> Result<InsertOutcome, AppError> {
        Ok(self.insert_row(transaction))
    }

    async fn assign_category(
        &self,
        owner_id: Uuid,
        transaction_ids: &[Uuid],
        category_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for row in state.transactions.iter_mut() {
            if row.owner_id == owner_id
                && !row.is_deleted
                && transaction_ids.contains(&row.transaction_id)
            {
                row.category_id = Some(category_id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn propagate_category(
        &self,
        owner_id: Uuid,
        key: &MerchantKey,
        category_id: Uuid,
    ) -> Result<u64, AppError> {
        let mut state = self.state.lock().unwrap();
        let mut updated = 0;
        for row in state.transactions.iter_mut() {
            if row.owner_id != owner_id || row.is_deleted || row.category_id.is_some() {
                continue;
            }
            let matches = match key {
                MerchantKey::Store(v) => row.store_name.as_deref() == Some(v),
                MerchantKey::Person(v) => row.person_name.as_deref() == Some(v),
                MerchantKey::Upi(v) => row.upi_id.as_deref() == Some(v),
            };
            if matches {
                row.category_id = Some(category_id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn aggregate_window(
        &self,
        owner_id: Uuid,
        account_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AmountTotals, AppError> {
        let state = self.state.lock().unwrap();
        let mut totals = AmountTotals::default();
        for row in state.transactions.iter().filter(|t| {
            t.owner_id == owner_id
                && !t.is_deleted
                && t.account_number.as_deref() == Some(account_number)
                && t.transaction_date >= start
                && t.transaction_date <= end
        }) {
            totals.credit_total += row.credit_amount;
            totals.debit_total += row.debit_amount;
            totals.count += 1;
        }
        Ok(totals)
    }

    async fn find_uncategorized_since(
        &self,
        owner_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<PersistedTransaction>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| {
                t.owner_id == owner_id
                    && !t.is_deleted
                    && t.category_id.is_none()
                    && t.created_utc >= created_after
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl StatementStore for MemoryLedger {
    async fn latest_statement(
        &self,
        owner_id: Uuid,
        account_number: &str,
        bank_code: &str,
    ) -> Result<Option<AccountStatementMetadata>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .statements
            .iter()
            .filter(|s| {
                s.owner_id == owner_id
                    && s.account_number == account_number
                    && s.bank_code == bank_code
            })
            .max_by_key(|s| s.statement_end_date)
            .cloned())
    }

    async fn create_statement(&self, statement: &AccountStatementMetadata) -> Result<(), AppError> {
        self.state.lock().unwrap().statements.push(statement.clone());
        Ok(())
    }
}

#[async_trait]
impl DeadlineStore for MemoryLedger {
    async fn list_recurring(&self, owner_id: Uuid) -> Result<Vec<Deadline>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .deadlines
            .iter()
            .filter(|d| d.owner_id == owner_id && d.is_recurring)
            .cloned()
            .collect())
    }

    async fn create_deadline(&self, deadline: &Deadline) -> Result<(), AppError> {
        self.state.lock().unwrap().deadlines.push(deadline.clone());
        Ok(())
    }
}

#[async_trait]
impl CategoryLookup for MemoryLedger {
    async fn list_categories(&self, owner_id: Uuid) -> Result<Vec<CategoryRecord>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .categories
            .iter()
            .filter(|c| c.is_default || c.owner_id == Some(owner_id))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Classifier, resolver and audit fakes
// ============================================================================

/// Classifier that assigns every transaction the same category with a fixed
/// confidence, recording each batch it receives.
pub struct ScriptedClassifier {
    pub category_id: Uuid,
    pub category_name: String,
    pub confidence: f64,
    pub calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedClassifier {
    pub fn new(category_id: Uuid, category_name: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            category_id,
            category_name: category_name.to_string(),
            confidence,
            calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl TransactionClassifier for ScriptedClassifier {
    async fn classify_batch(
        &self,
        batch: &[ClassifyRequest],
        _candidates: &[CategoryRecord],
    ) -> Result<Vec<ClassifyResult>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batch_sizes.lock().unwrap().push(batch.len());
        Ok(batch
            .iter()
            .map(|request| ClassifyResult {
                id: request.id,
                category_id: Some(self.category_id),
                category_name: Some(self.category_name.clone()),
                confidence: self.confidence,
            })
            .collect())
    }
}

/// Classifier that always fails, for degradation tests.
pub struct FailingClassifier;

#[async_trait]
impl TransactionClassifier for FailingClassifier {
    async fn classify_batch(
        &self,
        _batch: &[ClassifyRequest],
        _candidates: &[CategoryRecord],
    ) -> Result<Vec<ClassifyResult>, AppError> {
        Err(AppError::ClassifierError(anyhow::anyhow!("model offline")))
    }
}

/// Resolver with a fixed alias table; unknown names resolve to themselves by
/// omission.
#[derive(Default)]
pub struct StaticResolver {
    aliases: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_aliases(aliases: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            aliases: aliases
                .iter()
                .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
                .collect(),
        })
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn resolve_batch(
        &self,
        _owner_id: Uuid,
        names: &[String],
        _kind: EntityKind,
    ) -> Result<HashMap<String, String>, AppError> {
        Ok(names
            .iter()
            .filter_map(|name| {
                self.aliases
                    .get(name)
                    .map(|canonical| (name.clone(), canonical.clone()))
            })
            .collect())
    }
}

/// Audit sink that records every event it receives.
#[derive(Default)]
pub struct RecordingAuditSink {
    pub events: Mutex<Vec<(String, Uuid)>>,
}

impl RecordingAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: &str, actor: Uuid, _metadata: serde_json::Value) {
        self.events.lock().unwrap().push((event.to_string(), actor));
    }
}

// ============================================================================
// Builders
// ============================================================================

pub fn default_categories() -> Vec<CategoryRecord> {
    [
        ("Salary", "income"),
        ("Groceries", "expense"),
        ("Food & Dining", "expense"),
        ("Utilities", "expense"),
        ("Rent", "expense"),
        ("Subscriptions", "expense"),
        ("Other", "expense"),
    ]
    .iter()
    .map(|(name, category_type)| CategoryRecord {
        category_id: Uuid::new_v4(),
        owner_id: None,
        name: name.to_string(),
        category_type: category_type.to_string(),
        color: None,
        icon: None,
        is_default: true,
    })
    .collect()
}

pub fn debit_record(description: &str, amount: i64, date: &str) -> RawImportRecord {
    RawImportRecord {
        title: Some(description.to_string()),
        debit_amount: Some(Decimal::new(amount, 0)),
        date: Some(date.to_string()),
        ..Default::default()
    }
}

pub fn credit_record(description: &str, amount: i64, date: &str) -> RawImportRecord {
    RawImportRecord {
        title: Some(description.to_string()),
        credit_amount: Some(Decimal::new(amount, 0)),
        date: Some(date.to_string()),
        ..Default::default()
    }
}

pub fn import_request(owner_id: Uuid, records: Vec<RawImportRecord>) -> ImportRequest {
    ImportRequest {
        owner_id,
        records,
        statement: None,
        options: ImportOptions::default(),
    }
}

pub fn statement_declaration(
    account: &str,
    bank: &str,
    opening: i64,
    closing: i64,
    start: &str,
    end: &str,
) -> StatementDeclaration {
    StatementDeclaration {
        account_number: Some(account.to_string()),
        bank_code: Some(bank.to_string()),
        opening_balance: Some(Decimal::new(opening, 0)),
        closing_balance: Some(Decimal::new(closing, 0)),
        statement_start_date: Some(start.parse().unwrap()),
        statement_end_date: Some(end.parse().unwrap()),
    }
}

pub fn prior_statement(
    owner_id: Uuid,
    account: &str,
    bank: &str,
    closing: i64,
    end: &str,
) -> AccountStatementMetadata {
    AccountStatementMetadata {
        statement_id: Uuid::new_v4(),
        owner_id,
        account_number: account.to_string(),
        bank_code: bank.to_string(),
        opening_balance: Decimal::ZERO,
        closing_balance: Decimal::new(closing, 0),
        statement_start_date: "2024-01-01".parse().unwrap(),
        statement_end_date: end.parse().unwrap(),
        total_debits: Decimal::ZERO,
        total_credits: Decimal::ZERO,
        transaction_count: 0,
        created_utc: Utc::now(),
    }
}

pub struct TestHarness {
    pub ledger: Arc<MemoryLedger>,
    pub audit: Arc<RecordingAuditSink>,
    pub pipeline: ImportPipeline,
}

/// Build a pipeline over an in-memory ledger seeded with the default
/// categories.
pub fn spawn_pipeline(classifier: Option<Arc<dyn TransactionClassifier>>) -> TestHarness {
    spawn_pipeline_with(
        MemoryLedger::with_categories(default_categories()),
        classifier,
        StaticResolver::new(),
    )
}

pub fn spawn_pipeline_with(
    ledger: Arc<MemoryLedger>,
    classifier: Option<Arc<dyn TransactionClassifier>>,
    resolver: Arc<dyn NameResolver>,
) -> TestHarness {
    spawn_pipeline_with_config(ledger, classifier, resolver, PipelineConfig::default())
}

pub fn spawn_pipeline_with_config(
    ledger: Arc<MemoryLedger>,
    classifier: Option<Arc<dyn TransactionClassifier>>,
    resolver: Arc<dyn NameResolver>,
    config: PipelineConfig,
) -> TestHarness {
    let audit = RecordingAuditSink::new();
    let collaborators = Collaborators {
        transactions: ledger.clone(),
        statements: ledger.clone(),
        deadlines: ledger.clone(),
        categories: ledger.clone(),
        classifier,
        resolver,
        audit: audit.clone(),
    };
    TestHarness {
        ledger,
        audit,
        pipeline: ImportPipeline::new(collaborators, config),
    }
}
