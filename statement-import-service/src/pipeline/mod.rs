//! The statement import pipeline.
//!
//! One import call runs normalization, name resolution, dedup,
//! reconciliation, persistence, auto-pay detection and categorization in
//! sequence. Failures past persistence degrade the result (fewer categorized
//! rows, fewer deadlines) instead of losing validated transaction data.

pub mod autopay;
pub mod categorize;
pub mod dedup;
pub mod dispatch;
pub mod normalize;
pub mod persist;
pub mod reconcile;

use crate::config::PipelineConfig;
use crate::models::{
    AccountStatementMetadata, CanonicalTransaction, ImportRequest, ImportSummary,
    StatementDeclaration,
};
use crate::services::audit::AuditSink;
use crate::services::classifier::TransactionClassifier;
use crate::services::metrics::{record_import_operation, record_normalized};
use crate::services::resolver::{EntityKind, NameResolver};
use crate::services::store::{CategoryLookup, DeadlineStore, StatementStore, TransactionStore};
use categorize::CategorizationInput;
use chrono::{Duration, Utc};
use dispatch::{BackgroundOutcome, BackgroundRegistry};
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// How far back the background pass re-queries for freshly created rows. The
/// handoff is a time window, not an explicit id list, so a task restarted by
/// the runtime still finds its work.
const BACKGROUND_LOOKBACK_MINUTES: i64 = 10;

/// Collaborator set built once per service and shared across import calls.
/// The pipeline only ever talks to these interfaces.
#[derive(Clone)]
pub struct Collaborators {
    pub transactions: Arc<dyn TransactionStore>,
    pub statements: Arc<dyn StatementStore>,
    pub deadlines: Arc<dyn DeadlineStore>,
    pub categories: Arc<dyn CategoryLookup>,
    pub classifier: Option<Arc<dyn TransactionClassifier>>,
    pub resolver: Arc<dyn NameResolver>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct ImportPipeline {
    collaborators: Collaborators,
    config: PipelineConfig,
    registry: Arc<BackgroundRegistry>,
}

impl ImportPipeline {
    pub fn new(collaborators: Collaborators, config: PipelineConfig) -> Self {
        Self {
            collaborators,
            config,
            registry: Arc::new(BackgroundRegistry::new()),
        }
    }

    pub fn registry(&self) -> Arc<BackgroundRegistry> {
        self.registry.clone()
    }

    /// Run one import end to end.
    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, records = request.records.len()))]
    pub async fn import_bank_statement(
        &self,
        request: ImportRequest,
    ) -> Result<ImportSummary, AppError> {
        request.validate()?;

        let owner_id = request.owner_id;
        let batch_size = request.records.len();
        let now = Utc::now();
        let mut summary = ImportSummary::default();

        // Phase 1: normalization. Lenient retention, nothing is dropped.
        let statement_start = request
            .statement
            .as_ref()
            .and_then(|s| s.statement_start_date);
        let mut candidates = normalize::normalize_batch(
            &request.records,
            owner_id,
            statement_start,
            now.date_naive(),
        );
        for candidate in &candidates {
            let quality = if candidate.flags.is_partial_data
                || candidate.flags.has_invalid_date
                || candidate.flags.has_zero_amount
            {
                "flagged"
            } else {
                "clean"
            };
            record_normalized(quality);
        }

        // Phase 2: canonical-name resolution, before dedup keys are built.
        // A resolver failure degrades to raw names.
        if let Err(e) = self.resolve_names(owner_id, &mut candidates).await {
            warn!(error = %e, "Name resolution failed, using raw names");
            summary
                .warnings
                .push(format!("name resolution unavailable: {e}"));
        }

        // Phase 3: independent read-side lookups, issued concurrently.
        let declaration = request.statement.as_ref();
        let prior_statement_fut = async {
            match declaration.and_then(|d| {
                d.account_number
                    .as_deref()
                    .zip(d.bank_code.as_deref())
            }) {
                Some((account, bank)) => {
                    self.collaborators
                        .statements
                        .latest_statement(owner_id, account, bank)
                        .await
                }
                None => Ok(None),
            }
        };
        let (existing_count, categories, recurring_deadlines, prior_statement) = tokio::try_join!(
            self.collaborators.transactions.count_for_owner(owner_id),
            self.collaborators.categories.list_categories(owner_id),
            self.collaborators.deadlines.list_recurring(owner_id),
            prior_statement_fut,
        )?;

        // Phase 4: dedup, intra-batch then against history. The history pass
        // is skipped for first-time users and trusted re-imports.
        let intra = dedup::dedupe_batch(candidates);
        summary.duplicates += intra.duplicate_count;

        let deduped = if request.options.skip_history_dedup || existing_count == 0 {
            intra.to_insert
        } else {
            match dedup::history_window(&intra.to_insert, self.config.history_window_days) {
                Some((start, end)) => {
                    let existing = self
                        .collaborators
                        .transactions
                        .find_in_window(owner_id, start, end)
                        .await?;
                    let history = dedup::dedupe_against_history(intra.to_insert, &existing);
                    summary.duplicates += history.duplicate_count;
                    history.to_insert
                }
                None => intra.to_insert,
            }
        };

        // Phase 5: balance validation and continuity. A hard mismatch is
        // reported prominently but never blocks the insert.
        if let Some(declared_opening) = declaration.and_then(|d| d.opening_balance) {
            let validation = reconcile::validate_opening_balance(
                prior_statement.as_ref(),
                declared_opening,
                self.config.balance_tolerance,
                self.config.balance_hard_threshold,
            );
            if let Some(warning) = &validation.warning {
                summary.warnings.push(warning.clone());
            }
            if let Some(error) = &validation.error {
                summary.errors.push(error.clone());
            }
            summary.balance_validation = Some(validation);
        }
        if let Some(new_start) = declaration.and_then(|d| d.statement_start_date) {
            let continuity = reconcile::check_continuity(prior_statement.as_ref(), new_start);
            if continuity.has_gap {
                summary.warnings.push(format!(
                    "{} day gap since the previous statement ending {}",
                    continuity.gap_days,
                    continuity
                        .last_end_date
                        .map(|d| d.to_string())
                        .unwrap_or_default()
                ));
            }
        }

        // Phase 6: persistence with bounded chunk concurrency.
        let persist_outcome = persist::persist(
            self.collaborators.transactions.as_ref(),
            &deduped,
            self.config.chunk_concurrency,
        )
        .await;
        summary.inserted = persist_outcome.inserted;
        summary.duplicates += persist_outcome.duplicates;
        summary.credit_inserted = persist_outcome.credit_inserted;
        summary.debit_inserted = persist_outcome.debit_inserted;
        summary.errors.extend(persist_outcome.errors.clone());

        let inserted_set: HashSet<Uuid> = persist_outcome.inserted_ids.iter().copied().collect();
        let inserted: Vec<&CanonicalTransaction> = deduped
            .iter()
            .filter(|t| inserted_set.contains(&t.transaction_id))
            .collect();

        // Phase 7: closing reconciliation and statement metadata.
        if let Some(decl) = declaration {
            self.finalize_statement(owner_id, decl, &mut summary).await;
        }

        // Phase 8: auto-pay detection. Failure degrades to a warning.
        let patterns = autopay::detect(
            &deduped,
            self.config.autopay_min_occurrences,
            self.config.amount_bucket_tolerance,
        );
        let new_deadlines = autopay::materialize(
            owner_id,
            &patterns,
            &recurring_deadlines,
            self.config.autopay_confidence_floor,
        );
        for deadline in &new_deadlines {
            match self.collaborators.deadlines.create_deadline(deadline).await {
                Ok(()) => {
                    summary.deadlines_created += 1;
                    crate::services::metrics::record_autopay_pattern("created");
                }
                Err(e) => {
                    warn!(title = %deadline.title, error = %e, "Deadline creation failed");
                    summary
                        .warnings
                        .push(format!("deadline '{}' not created: {e}", deadline.title));
                    crate::services::metrics::record_autopay_pattern("failed");
                }
            }
        }

        // Phase 9: categorization, inline or dispatched.
        let classifier = if request.options.ai_categorization {
            self.collaborators.classifier.clone()
        } else {
            None
        };
        if dispatch::should_dispatch_background(
            &request.options,
            summary.inserted as usize,
            batch_size,
            &self.config,
        ) {
            summary.background_task_id =
                Some(self.dispatch_background(owner_id, classifier, now - Duration::minutes(BACKGROUND_LOOKBACK_MINUTES)));
        } else {
            let inputs: Vec<CategorizationInput> =
                inserted.iter().map(|t| CategorizationInput::from(*t)).collect();
            let outcome = categorize::categorize(
                &inputs,
                &categories,
                classifier.as_deref(),
                self.config.ai_batch_limit,
            )
            .await;
            summary.categorized_count = outcome.assignments.len() as u64;
            if let Err(e) = categorize::apply_assignments(
                self.collaborators.transactions.as_ref(),
                owner_id,
                &inputs,
                &outcome,
            )
            .await
            {
                warn!(error = %e, "Category write-back failed");
                summary
                    .warnings
                    .push(format!("category write-back incomplete: {e}"));
            }
        }

        // Fire-and-forget audit trail.
        let audit = self.collaborators.audit.clone();
        let audit_payload = serde_json::json!({
            "inserted": summary.inserted,
            "duplicates": summary.duplicates,
            "deadlinesCreated": summary.deadlines_created,
            "warnings": summary.warnings.len(),
        });
        tokio::spawn(async move {
            audit
                .record("statement_import", owner_id, audit_payload)
                .await;
        });

        record_import_operation(if summary.errors.is_empty() {
            "success"
        } else {
            "completed_with_errors"
        });
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            categorized = summary.categorized_count,
            deadlines = summary.deadlines_created,
            "Import complete"
        );

        Ok(summary)
    }

    /// Poll a background categorization task by id.
    pub async fn poll_background_task(&self, task_id: Uuid) -> dispatch::TaskStatus {
        self.registry.poll(task_id).await
    }

    async fn resolve_names(
        &self,
        owner_id: Uuid,
        candidates: &mut [CanonicalTransaction],
    ) -> Result<(), AppError> {
        let unique = |extract: fn(&CanonicalTransaction) -> Option<&String>| -> Vec<String> {
            candidates
                .iter()
                .filter_map(extract)
                .cloned()
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        };
        let stores = unique(|t| t.metadata.store_name.as_ref());
        let persons = unique(|t| t.metadata.person_name.as_ref());

        let resolver = &self.collaborators.resolver;
        let (store_map, person_map): (HashMap<String, String>, HashMap<String, String>) = tokio::try_join!(
            resolver.resolve_batch(owner_id, &stores, EntityKind::Merchant),
            resolver.resolve_batch(owner_id, &persons, EntityKind::Person),
        )?;

        for candidate in candidates.iter_mut() {
            if let Some(store) = &candidate.metadata.store_name {
                if let Some(canonical) = store_map.get(store) {
                    candidate.metadata.store_name = Some(canonical.clone());
                }
            }
            if let Some(person) = &candidate.metadata.person_name {
                if let Some(canonical) = person_map.get(person) {
                    candidate.metadata.person_name = Some(canonical.clone());
                }
            }
        }
        Ok(())
    }

    /// Compare declared and computed closing balances and record statement
    /// metadata. Failures here degrade to warnings; the rows are already in.
    async fn finalize_statement(
        &self,
        owner_id: Uuid,
        declaration: &StatementDeclaration,
        summary: &mut ImportSummary,
    ) {
        let (Some(account), Some(bank), Some(start), Some(end), Some(opening)) = (
            declaration.account_number.as_deref(),
            declaration.bank_code.as_deref(),
            declaration.statement_start_date,
            declaration.statement_end_date,
            declaration.opening_balance,
        ) else {
            return;
        };

        let totals = match self
            .collaborators
            .transactions
            .aggregate_window(owner_id, account, start, end)
            .await
        {
            Ok(totals) => totals,
            Err(e) => {
                warn!(error = %e, "Statement aggregation failed");
                summary
                    .warnings
                    .push(format!("statement metadata not recorded: {e}"));
                return;
            }
        };

        if let Some(declared_closing) = declaration.closing_balance {
            if let Some(warning) = reconcile::reconcile_closing(
                opening,
                totals.credit_total,
                totals.debit_total,
                declared_closing,
                self.config.balance_tolerance,
            ) {
                summary.warnings.push(warning);
            }
        }

        let computed_closing = opening + totals.credit_total - totals.debit_total;
        let statement = AccountStatementMetadata {
            statement_id: Uuid::new_v4(),
            owner_id,
            account_number: account.to_string(),
            bank_code: bank.to_string(),
            opening_balance: opening,
            closing_balance: declaration.closing_balance.unwrap_or(computed_closing),
            statement_start_date: start,
            statement_end_date: end,
            total_debits: totals.debit_total,
            total_credits: totals.credit_total,
            transaction_count: totals.count as i32,
            created_utc: Utc::now(),
        };
        if let Err(e) = self
            .collaborators
            .statements
            .create_statement(&statement)
            .await
        {
            warn!(error = %e, "Statement metadata creation failed");
            summary
                .warnings
                .push(format!("statement metadata not recorded: {e}"));
        }
    }

    /// Spawn the detached categorization pass. The task re-queries for
    /// recently created uncategorized rows instead of carrying ids.
    fn dispatch_background(
        &self,
        owner_id: Uuid,
        classifier: Option<Arc<dyn TransactionClassifier>>,
        created_after: chrono::DateTime<Utc>,
    ) -> Uuid {
        let transactions = self.collaborators.transactions.clone();
        let categories = self.collaborators.categories.clone();
        let ai_batch_limit = self.config.ai_batch_limit;

        self.registry.spawn(async move {
            let rows = transactions
                .find_uncategorized_since(owner_id, created_after)
                .await?;
            let inputs: Vec<CategorizationInput> =
                rows.iter().map(CategorizationInput::from).collect();
            let candidates = categories.list_categories(owner_id).await?;
            let outcome = categorize::categorize(
                &inputs,
                &candidates,
                classifier.as_deref(),
                ai_batch_limit,
            )
            .await;
            let propagated = categorize::apply_assignments(
                transactions.as_ref(),
                owner_id,
                &inputs,
                &outcome,
            )
            .await?;
            info!(
                owner_id = %owner_id,
                categorized = outcome.assignments.len(),
                propagated = propagated,
                "Background categorization finished"
            );
            Ok(BackgroundOutcome {
                categorized: outcome.assignments.len() as u64,
                propagated,
            })
        })
    }
}
