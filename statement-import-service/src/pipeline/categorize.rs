//! Categorization engine.
//!
//! Per transaction: an ordered keyword-rule scan first, then an AI batch
//! fallback for whatever the rules missed. Rule hits and accepted AI verdicts
//! never resolve to the catch-all category; a transaction the engine cannot
//! place stays uncategorized. Accepted matches are written back in bulk and
//! propagated to older uncategorized rows sharing the same merchant.

use crate::models::{CanonicalTransaction, CategoryRecord, PersistedTransaction};
use crate::services::classifier::{ClassifyRequest, TransactionClassifier};
use crate::services::metrics::record_categorization;
use crate::services::store::{MerchantKey, TransactionStore};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Category names that are never valid automatic-classification targets.
const CATCH_ALL_NAMES: &[&str] = &["other", "miscellaneous", "misc", "uncategorized"];

/// Ordered keyword groups. Earlier groups win; keywords shorter than three
/// normalized characters are ignored at match time.
const RULE_TABLE: &[(&[&str], &str)] = &[
    (&["salary", "payroll", "stipend"], "Salary"),
    (
        &[
            "milk", "grocery", "groceries", "supermarket", "bigbasket", "vegetables", "kirana",
        ],
        "Groceries",
    ),
    (
        &[
            "swiggy", "zomato", "restaurant", "cafe", "pizza", "dominos", "food",
        ],
        "Food & Dining",
    ),
    (
        &["uber", "ola", "metro", "cab", "taxi", "irctc", "train"],
        "Transport",
    ),
    (
        &["petrol", "diesel", "fuel", "hpcl", "bpcl", "indianoil"],
        "Fuel",
    ),
    (
        &[
            "electricity", "broadband", "internet", "recharge", "dth", "postpaid",
        ],
        "Utilities",
    ),
    (&["rent", "lease", "landlord"], "Rent"),
    (
        &["netflix", "spotify", "hotstar", "subscription"],
        "Subscriptions",
    ),
    (
        &["amazon", "flipkart", "myntra", "shopping"],
        "Shopping",
    ),
    (
        &["movie", "cinema", "pvr", "inox", "bookmyshow"],
        "Entertainment",
    ),
    (
        &[
            "pharmacy", "hospital", "clinic", "medicine", "apollo", "doctor",
        ],
        "Health",
    ),
    (&["insurance", "premium", "lic"], "Insurance"),
    (
        &["sip", "mutualfund", "zerodha", "groww", "investment", "etf"],
        "Investments",
    ),
    (
        &["flight", "hotel", "airline", "indigo", "makemytrip"],
        "Travel",
    ),
    (
        &["school", "college", "tuition", "course", "udemy"],
        "Education",
    ),
];

/// Fallback synonyms consulted when a rule's category name has no exact or
/// substring match among the owner's categories.
const SYNONYM_TABLE: &[(&str, &[&str])] = &[
    ("Groceries", &["grocery", "supermarket", "food & groceries"]),
    ("Food & Dining", &["food", "dining", "restaurants", "eating out"]),
    ("Transport", &["transportation", "commute", "travel local"]),
    ("Utilities", &["bills", "utility"]),
    ("Subscriptions", &["subscription", "memberships"]),
    ("Investments", &["investment", "investing"]),
    ("Health", &["healthcare", "medical"]),
    ("Salary", &["income", "wages"]),
];

/// One transaction as seen by the engine, whether freshly normalized or
/// re-read from the ledger by the background pass.
#[derive(Debug, Clone)]
pub struct CategorizationInput {
    pub transaction_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub store_name: Option<String>,
    pub person_name: Option<String>,
    pub upi_id: Option<String>,
}

impl From<&CanonicalTransaction> for CategorizationInput {
    fn from(t: &CanonicalTransaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            description: t.description.clone(),
            amount: if t.debit_amount > Decimal::ZERO {
                t.debit_amount
            } else {
                t.credit_amount
            },
            store_name: t.metadata.store_name.clone(),
            person_name: t.metadata.person_name.clone(),
            upi_id: t.metadata.upi_id.clone(),
        }
    }
}

impl From<&PersistedTransaction> for CategorizationInput {
    fn from(t: &PersistedTransaction) -> Self {
        Self {
            transaction_id: t.transaction_id,
            description: t.description.clone(),
            amount: if t.debit_amount > Decimal::ZERO {
                t.debit_amount
            } else {
                t.credit_amount
            },
            store_name: t.store_name.clone(),
            person_name: t.person_name.clone(),
            upi_id: t.upi_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    Rule,
    Ai,
}

#[derive(Debug, Clone)]
pub struct CategoryAssignment {
    pub transaction_id: Uuid,
    pub category_id: Uuid,
    pub source: MatchSource,
    pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct CategorizationOutcome {
    pub assignments: Vec<CategoryAssignment>,
    pub rule_matched: u64,
    pub ai_matched: u64,
    pub unmatched: u64,
}

/// Lowercase and strip everything non-alphanumeric. Rule keywords and
/// transaction text go through the same reduction so matches are
/// punctuation-insensitive.
fn normalize_text(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn is_catch_all(name: &str) -> bool {
    let lowered = name.trim().to_lowercase();
    CATCH_ALL_NAMES.contains(&lowered.as_str())
}

/// First matching rule for the transaction's normalized text, if any.
fn rule_match(input: &CategorizationInput) -> Option<&'static str> {
    let mut text = normalize_text(&input.description);
    if let Some(store) = &input.store_name {
        text.push_str(&normalize_text(store));
    }

    for (keywords, category_name) in RULE_TABLE {
        for keyword in *keywords {
            let normalized = normalize_text(keyword);
            if normalized.chars().count() < 3 {
                continue;
            }
            if text.contains(&normalized) {
                return Some(category_name);
            }
        }
    }
    None
}

/// Resolve a rule's category name to a concrete category: exact match, then
/// substring, then the synonym table. The catch-all is never a target.
fn resolve_category<'a>(
    name: &str,
    categories: &'a [CategoryRecord],
) -> Option<&'a CategoryRecord> {
    let target = name.to_lowercase();
    let eligible: Vec<&CategoryRecord> = categories
        .iter()
        .filter(|c| !is_catch_all(&c.name))
        .collect();

    if let Some(exact) = eligible
        .iter()
        .find(|c| c.name.to_lowercase() == target)
    {
        return Some(exact);
    }

    if let Some(partial) = eligible.iter().find(|c| {
        let candidate = c.name.to_lowercase();
        candidate.contains(&target) || target.contains(&candidate)
    }) {
        return Some(partial);
    }

    let synonyms = SYNONYM_TABLE
        .iter()
        .find(|(rule_name, _)| rule_name.eq_ignore_ascii_case(name))
        .map(|(_, synonyms)| *synonyms)?;

    for synonym in synonyms {
        if let Some(matched) = eligible.iter().find(|c| {
            let candidate = c.name.to_lowercase();
            candidate == *synonym || candidate.contains(synonym)
        }) {
            return Some(matched);
        }
    }
    None
}

/// Run the rule phase then the AI fallback. A classifier failure degrades to
/// zero AI matches; rule matches from the same run are unaffected.
pub async fn categorize(
    inputs: &[CategorizationInput],
    categories: &[CategoryRecord],
    classifier: Option<&dyn TransactionClassifier>,
    ai_batch_limit: usize,
) -> CategorizationOutcome {
    let mut outcome = CategorizationOutcome::default();
    let mut unmatched: Vec<&CategorizationInput> = Vec::new();

    for input in inputs {
        match rule_match(input).and_then(|name| resolve_category(name, categories)) {
            Some(category) => {
                outcome.assignments.push(CategoryAssignment {
                    transaction_id: input.transaction_id,
                    category_id: category.category_id,
                    source: MatchSource::Rule,
                    confidence: 1.0,
                });
                outcome.rule_matched += 1;
            }
            None => unmatched.push(input),
        }
    }

    if let Some(classifier) = classifier {
        let candidates: Vec<CategoryRecord> = categories
            .iter()
            .filter(|c| !is_catch_all(&c.name))
            .cloned()
            .collect();
        let candidate_ids: std::collections::HashSet<Uuid> =
            candidates.iter().map(|c| c.category_id).collect();

        // Cap the payload per invocation; anything beyond the cap stays
        // uncategorized until a later pass.
        let batch: Vec<ClassifyRequest> = unmatched
            .iter()
            .take(ai_batch_limit)
            .map(|input| ClassifyRequest {
                id: input.transaction_id,
                description: input.description.clone(),
                amount: input.amount,
                store: input.store_name.clone(),
            })
            .collect();

        if !batch.is_empty() {
            match classifier.classify_batch(&batch, &candidates).await {
                Ok(results) => {
                    let accepted: HashMap<Uuid, (Uuid, f64)> = results
                        .into_iter()
                        .filter(|r| r.confidence > 0.5)
                        .filter_map(|r| {
                            let category_id = r.category_id?;
                            if !candidate_ids.contains(&category_id) {
                                return None;
                            }
                            if r.category_name.as_deref().is_some_and(is_catch_all) {
                                return None;
                            }
                            Some((r.id, (category_id, r.confidence)))
                        })
                        .collect();

                    for input in &unmatched {
                        if let Some((category_id, confidence)) =
                            accepted.get(&input.transaction_id)
                        {
                            outcome.assignments.push(CategoryAssignment {
                                transaction_id: input.transaction_id,
                                category_id: *category_id,
                                source: MatchSource::Ai,
                                confidence: *confidence,
                            });
                            outcome.ai_matched += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Classifier call failed; batch left uncategorized");
                }
            }
        }
    }

    outcome.unmatched = inputs.len() as u64 - outcome.rule_matched - outcome.ai_matched;

    record_categorization("rule", outcome.rule_matched);
    record_categorization("ai", outcome.ai_matched);
    record_categorization("unmatched", outcome.unmatched);
    debug!(
        rule_matched = outcome.rule_matched,
        ai_matched = outcome.ai_matched,
        unmatched = outcome.unmatched,
        "Categorization complete"
    );

    outcome
}

fn merchant_keys(input: &CategorizationInput) -> Vec<MerchantKey> {
    let mut keys = Vec::new();
    if let Some(store) = input.store_name.as_deref().filter(|s| !s.trim().is_empty()) {
        keys.push(MerchantKey::Store(store.trim().to_string()));
    }
    if let Some(person) = input.person_name.as_deref().filter(|s| !s.trim().is_empty()) {
        keys.push(MerchantKey::Person(person.trim().to_string()));
    }
    if let Some(upi) = input.upi_id.as_deref().filter(|s| !s.trim().is_empty()) {
        keys.push(MerchantKey::Upi(upi.trim().to_string()));
    }
    keys
}

/// Write accepted assignments back to the ledger and propagate each freshly
/// assigned category to older uncategorized rows with the same merchant.
/// Returns the number of rows updated by propagation.
pub async fn apply_assignments(
    store: &dyn TransactionStore,
    owner_id: Uuid,
    inputs: &[CategorizationInput],
    outcome: &CategorizationOutcome,
) -> Result<u64, AppError> {
    let mut by_category: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for assignment in &outcome.assignments {
        by_category
            .entry(assignment.category_id)
            .or_default()
            .push(assignment.transaction_id);
    }

    for (category_id, transaction_ids) in &by_category {
        store
            .assign_category(owner_id, transaction_ids, *category_id)
            .await?;
    }

    let inputs_by_id: HashMap<Uuid, &CategorizationInput> = inputs
        .iter()
        .map(|input| (input.transaction_id, input))
        .collect();

    let mut propagated = 0u64;
    let mut seen_keys: std::collections::HashSet<MerchantKey> = std::collections::HashSet::new();
    for assignment in &outcome.assignments {
        let Some(input) = inputs_by_id.get(&assignment.transaction_id) else {
            continue;
        };
        for key in merchant_keys(input) {
            if seen_keys.insert(key.clone()) {
                propagated += store
                    .propagate_category(owner_id, &key, assignment.category_id)
                    .await?;
            }
        }
    }

    Ok(propagated)
}
