//! Database service for statement-import-service.

use crate::models::{
    AccountStatementMetadata, CanonicalTransaction, CategoryRecord, Deadline, PersistedTransaction,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{
    AmountTotals, CategoryLookup, ConflictPolicy, DeadlineStore, InsertOutcome, MerchantKey,
    StatementStore, TransactionStore,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "statement-import-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

const TRANSACTION_COLUMNS: &str = "transaction_id, owner_id, description, transaction_date, \
     credit_amount, debit_amount, category, category_id, bank_code, transaction_ref, \
     account_number, transfer_type, person_name, upi_id, branch, store_name, commodity, \
     is_partial_data, has_invalid_date, has_zero_amount, parsing_method, parsing_confidence, \
     is_deleted, created_utc";

// The conflict target must match the ledger uniqueness index exactly,
// including the 50-char description prefix shared with the dedup keys.
const TRANSACTION_CONFLICT_TARGET: &str =
    "(owner_id, (left(description, 50)), credit_amount, debit_amount, transaction_date) \
     WHERE NOT is_deleted";

// =========================================================================
// Transaction Operations
// =========================================================================

#[async_trait]
impl TransactionStore for Database {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn count_for_owner(&self, owner_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["count_for_owner"])
            .start_timer();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM transactions
            WHERE owner_id = $1 AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to count transactions: {}", e))
        })?;

        timer.observe_duration();
        Ok(count)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn find_in_window(
        &self,
        owner_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PersistedTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_in_window"])
            .start_timer();

        let rows = sqlx::query_as::<_, PersistedTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE owner_id = $1 AND transaction_date BETWEEN $2 AND $3
            "#
        ))
        .bind(owner_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to fetch transaction window: {}", e))
        })?;

        timer.observe_duration();
        Ok(rows)
    }

    #[instrument(skip(self, transactions), fields(count = transactions.len()))]
    async fn create_many(
        &self,
        transactions: &[CanonicalTransaction],
        policy: ConflictPolicy,
    ) -> Result<Vec<Uuid>, AppError> {
        if transactions.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_many"])
            .start_timer();

        let mut ids: Vec<Uuid> = Vec::with_capacity(transactions.len());
        let mut owners: Vec<Uuid> = Vec::with_capacity(transactions.len());
        let mut descriptions: Vec<String> = Vec::with_capacity(transactions.len());
        let mut dates: Vec<NaiveDate> = Vec::with_capacity(transactions.len());
        let mut credits: Vec<Decimal> = Vec::with_capacity(transactions.len());
        let mut debits: Vec<Decimal> = Vec::with_capacity(transactions.len());
        let mut categories: Vec<String> = Vec::with_capacity(transactions.len());
        let mut category_ids: Vec<Option<Uuid>> = Vec::with_capacity(transactions.len());
        let mut bank_codes: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut transaction_refs: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut account_numbers: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut transfer_types: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut person_names: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut upi_ids: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut branches: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut store_names: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut commodities: Vec<Option<String>> = Vec::with_capacity(transactions.len());
        let mut partial_flags: Vec<bool> = Vec::with_capacity(transactions.len());
        let mut invalid_date_flags: Vec<bool> = Vec::with_capacity(transactions.len());
        let mut zero_amount_flags: Vec<bool> = Vec::with_capacity(transactions.len());
        let mut parsing_methods: Vec<String> = Vec::with_capacity(transactions.len());
        let mut confidences: Vec<f64> = Vec::with_capacity(transactions.len());

        for t in transactions {
            ids.push(t.transaction_id);
            owners.push(t.owner_id);
            descriptions.push(t.description.clone());
            dates.push(t.transaction_date);
            credits.push(t.credit_amount);
            debits.push(t.debit_amount);
            categories.push(t.category.as_str().to_string());
            category_ids.push(t.category_id);
            bank_codes.push(t.metadata.bank_code.clone());
            transaction_refs.push(t.metadata.transaction_ref.clone());
            account_numbers.push(t.metadata.account_number.clone());
            transfer_types.push(t.metadata.transfer_type.clone());
            person_names.push(t.metadata.person_name.clone());
            upi_ids.push(t.metadata.upi_id.clone());
            branches.push(t.metadata.branch.clone());
            store_names.push(t.metadata.store_name.clone());
            commodities.push(t.metadata.commodity.clone());
            partial_flags.push(t.flags.is_partial_data);
            invalid_date_flags.push(t.flags.has_invalid_date);
            zero_amount_flags.push(t.flags.has_zero_amount);
            parsing_methods.push(t.parsing_method.as_str().to_string());
            confidences.push(t.parsing_confidence);
        }

        let conflict_clause = match policy {
            ConflictPolicy::IgnoreDuplicates => {
                format!("ON CONFLICT {TRANSACTION_CONFLICT_TARGET} DO NOTHING")
            }
            ConflictPolicy::Strict => String::new(),
        };

        let query = format!(
            r#"
            INSERT INTO transactions (transaction_id, owner_id, description, transaction_date,
                credit_amount, debit_amount, category, category_id, bank_code, transaction_ref,
                account_number, transfer_type, person_name, upi_id, branch, store_name, commodity,
                is_partial_data, has_invalid_date, has_zero_amount, parsing_method,
                parsing_confidence)
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[], $4::date[],
                $5::numeric[], $6::numeric[], $7::text[], $8::uuid[], $9::text[], $10::text[],
                $11::text[], $12::text[], $13::text[], $14::text[], $15::text[], $16::text[],
                $17::text[], $18::bool[], $19::bool[], $20::bool[], $21::text[], $22::float8[])
            {conflict_clause}
            RETURNING transaction_id
            "#
        );

        let inserted: Vec<(Uuid,)> = sqlx::query_as(&query)
            .bind(&ids)
            .bind(&owners)
            .bind(&descriptions)
            .bind(&dates)
            .bind(&credits)
            .bind(&debits)
            .bind(&categories)
            .bind(&category_ids)
            .bind(&bank_codes)
            .bind(&transaction_refs)
            .bind(&account_numbers)
            .bind(&transfer_types)
            .bind(&person_names)
            .bind(&upi_ids)
            .bind(&branches)
            .bind(&store_names)
            .bind(&commodities)
            .bind(&partial_flags)
            .bind(&invalid_date_flags)
            .bind(&zero_amount_flags)
            .bind(&parsing_methods)
            .bind(&confidences)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Bulk insert failed: {}", e))
            })?;

        timer.observe_duration();
        info!(
            attempted = transactions.len(),
            inserted = inserted.len(),
            "Bulk transaction insert"
        );

        Ok(inserted.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self, transaction), fields(transaction_id = %transaction.transaction_id))]
    async fn insert_one(
        &self,
        transaction: &CanonicalTransaction,
    ) -> Result<InsertOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_one"])
            .start_timer();

        let result = sqlx::query(&format!(
            r#"
            INSERT INTO transactions (transaction_id, owner_id, description, transaction_date,
                credit_amount, debit_amount, category, category_id, bank_code, transaction_ref,
                account_number, transfer_type, person_name, upi_id, branch, store_name, commodity,
                is_partial_data, has_invalid_date, has_zero_amount, parsing_method,
                parsing_confidence)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22)
            ON CONFLICT {TRANSACTION_CONFLICT_TARGET} DO NOTHING
            "#
        ))
        .bind(transaction.transaction_id)
        .bind(transaction.owner_id)
        .bind(&transaction.description)
        .bind(transaction.transaction_date)
        .bind(transaction.credit_amount)
        .bind(transaction.debit_amount)
        .bind(transaction.category.as_str())
        .bind(transaction.category_id)
        .bind(&transaction.metadata.bank_code)
        .bind(&transaction.metadata.transaction_ref)
        .bind(&transaction.metadata.account_number)
        .bind(&transaction.metadata.transfer_type)
        .bind(&transaction.metadata.person_name)
        .bind(&transaction.metadata.upi_id)
        .bind(&transaction.metadata.branch)
        .bind(&transaction.metadata.store_name)
        .bind(&transaction.metadata.commodity)
        .bind(transaction.flags.is_partial_data)
        .bind(transaction.flags.has_invalid_date)
        .bind(transaction.flags.has_zero_amount)
        .bind(transaction.parsing_method.as_str())
        .bind(transaction.parsing_confidence)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Insert failed: {}", e)))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    #[instrument(skip(self, transaction_ids), fields(owner_id = %owner_id, count = transaction_ids.len()))]
    async fn assign_category(
        &self,
        owner_id: Uuid,
        transaction_ids: &[Uuid],
        category_id: Uuid,
    ) -> Result<u64, AppError> {
        if transaction_ids.is_empty() {
            return Ok(0);
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["assign_category"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET category_id = $3
            WHERE owner_id = $1 AND transaction_id = ANY($2) AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .bind(transaction_ids)
        .bind(category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to assign category: {}", e))
        })?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, key), fields(owner_id = %owner_id))]
    async fn propagate_category(
        &self,
        owner_id: Uuid,
        key: &MerchantKey,
        category_id: Uuid,
    ) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["propagate_category"])
            .start_timer();

        let (column, value) = match key {
            MerchantKey::Store(v) => ("store_name", v),
            MerchantKey::Person(v) => ("person_name", v),
            MerchantKey::Upi(v) => ("upi_id", v),
        };

        let result = sqlx::query(&format!(
            r#"
            UPDATE transactions
            SET category_id = $3
            WHERE owner_id = $1 AND {column} = $2 AND category_id IS NULL AND NOT is_deleted
            "#
        ))
        .bind(owner_id)
        .bind(value)
        .bind(category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to propagate category: {}", e))
        })?;

        timer.observe_duration();
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, account_number = %account_number))]
    async fn aggregate_window(
        &self,
        owner_id: Uuid,
        account_number: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<AmountTotals, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["aggregate_window"])
            .start_timer();

        let (credit_total, debit_total, count): (Decimal, Decimal, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(credit_amount), 0), COALESCE(SUM(debit_amount), 0), COUNT(*)
            FROM transactions
            WHERE owner_id = $1 AND account_number = $2
              AND transaction_date BETWEEN $3 AND $4 AND NOT is_deleted
            "#,
        )
        .bind(owner_id)
        .bind(account_number)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to aggregate window: {}", e))
        })?;

        timer.observe_duration();
        Ok(AmountTotals {
            credit_total,
            debit_total,
            count,
        })
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn find_uncategorized_since(
        &self,
        owner_id: Uuid,
        created_after: DateTime<Utc>,
    ) -> Result<Vec<PersistedTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_uncategorized_since"])
            .start_timer();

        let rows = sqlx::query_as::<_, PersistedTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE owner_id = $1 AND category_id IS NULL AND created_utc >= $2 AND NOT is_deleted
            "#
        ))
        .bind(owner_id)
        .bind(created_after)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to fetch uncategorized transactions: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(rows)
    }
}

// =========================================================================
// Statement Operations
// =========================================================================

#[async_trait]
impl StatementStore for Database {
    #[instrument(skip(self), fields(owner_id = %owner_id, account_number = %account_number))]
    async fn latest_statement(
        &self,
        owner_id: Uuid,
        account_number: &str,
        bank_code: &str,
    ) -> Result<Option<AccountStatementMetadata>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_statement"])
            .start_timer();

        let statement = sqlx::query_as::<_, AccountStatementMetadata>(
            r#"
            SELECT statement_id, owner_id, account_number, bank_code, opening_balance,
                   closing_balance, statement_start_date, statement_end_date, total_debits,
                   total_credits, transaction_count, created_utc
            FROM account_statements
            WHERE owner_id = $1 AND account_number = $2 AND bank_code = $3
            ORDER BY statement_end_date DESC, created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(account_number)
        .bind(bank_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get latest statement: {}", e))
        })?;

        timer.observe_duration();
        Ok(statement)
    }

    #[instrument(skip(self, statement), fields(statement_id = %statement.statement_id))]
    async fn create_statement(&self, statement: &AccountStatementMetadata) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_statement"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO account_statements (statement_id, owner_id, account_number, bank_code,
                opening_balance, closing_balance, statement_start_date, statement_end_date,
                total_debits, total_credits, transaction_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(statement.statement_id)
        .bind(statement.owner_id)
        .bind(&statement.account_number)
        .bind(&statement.bank_code)
        .bind(statement.opening_balance)
        .bind(statement.closing_balance)
        .bind(statement.statement_start_date)
        .bind(statement.statement_end_date)
        .bind(statement.total_debits)
        .bind(statement.total_credits)
        .bind(statement.transaction_count)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create statement: {}", e))
        })?;

        timer.observe_duration();
        info!(statement_id = %statement.statement_id, "Statement metadata recorded");
        Ok(())
    }
}

// =========================================================================
// Deadline Operations
// =========================================================================

#[async_trait]
impl DeadlineStore for Database {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_recurring(&self, owner_id: Uuid) -> Result<Vec<Deadline>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_recurring"])
            .start_timer();

        let deadlines = sqlx::query_as::<_, Deadline>(
            r#"
            SELECT deadline_id, owner_id, title, amount, due_date, is_recurring, frequency,
                   status, created_utc
            FROM deadlines
            WHERE owner_id = $1 AND is_recurring
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list deadlines: {}", e))
        })?;

        timer.observe_duration();
        Ok(deadlines)
    }

    #[instrument(skip(self, deadline), fields(deadline_id = %deadline.deadline_id))]
    async fn create_deadline(&self, deadline: &Deadline) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_deadline"])
            .start_timer();

        sqlx::query(
            r#"
            INSERT INTO deadlines (deadline_id, owner_id, title, amount, due_date, is_recurring,
                frequency, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(deadline.deadline_id)
        .bind(deadline.owner_id)
        .bind(&deadline.title)
        .bind(deadline.amount)
        .bind(deadline.due_date)
        .bind(deadline.is_recurring)
        .bind(&deadline.frequency)
        .bind(&deadline.status)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create deadline: {}", e))
        })?;

        timer.observe_duration();
        info!(deadline_id = %deadline.deadline_id, title = %deadline.title, "Deadline created");
        Ok(())
    }
}

// =========================================================================
// Category Operations
// =========================================================================

#[async_trait]
impl CategoryLookup for Database {
    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_categories(&self, owner_id: Uuid) -> Result<Vec<CategoryRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_categories"])
            .start_timer();

        let categories = sqlx::query_as::<_, CategoryRecord>(
            r#"
            SELECT category_id, owner_id, name, category_type, color, icon, is_default
            FROM categories
            WHERE is_default OR owner_id = $1
            ORDER BY is_default DESC, name
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list categories: {}", e))
        })?;

        timer.observe_duration();
        Ok(categories)
    }
}
