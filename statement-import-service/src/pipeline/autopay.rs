//! Auto-pay detector.
//!
//! Groups debits by merchant and amount bucket, infers a payment frequency
//! from the modal gap between consecutive occurrences, and materializes
//! high-confidence patterns into deadline records unless an equivalent
//! recurring deadline already exists.

use crate::models::{AutoPayPattern, CanonicalTransaction, Deadline, PayFrequency};
use chrono::{Duration, Months, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Relative amount tolerance for bucketing and deadline matching.
const AMOUNT_TOLERANCE: f64 = 0.05;

fn within_tolerance(a: Decimal, b: Decimal, tolerance: f64) -> bool {
    let a = a.to_f64().unwrap_or(0.0);
    let b = b.to_f64().unwrap_or(0.0);
    if a == 0.0 && b == 0.0 {
        return true;
    }
    let reference = a.abs().max(b.abs());
    (a - b).abs() <= reference * tolerance
}

fn classify_interval(days: i64) -> Option<PayFrequency> {
    match days {
        1..=2 => Some(PayFrequency::Daily),
        5..=9 => Some(PayFrequency::Weekly),
        25..=35 => Some(PayFrequency::Monthly),
        _ => None,
    }
}

struct Group {
    merchant: String,
    amount: Decimal,
    dates: Vec<NaiveDate>,
}

/// Detect recurring payment patterns among the given transactions. Only
/// debit rows participate; credits are never auto-pay obligations.
pub fn detect(
    transactions: &[CanonicalTransaction],
    min_occurrences: usize,
    amount_tolerance: f64,
) -> Vec<AutoPayPattern> {
    let mut groups: HashMap<String, Vec<Group>> = HashMap::new();

    for txn in transactions {
        if txn.debit_amount <= Decimal::ZERO {
            continue;
        }
        let Some(merchant) = txn.merchant_identifier() else {
            continue;
        };

        let buckets = groups.entry(merchant.clone()).or_default();
        match buckets
            .iter_mut()
            .find(|g| within_tolerance(g.amount, txn.debit_amount, amount_tolerance))
        {
            Some(group) => group.dates.push(txn.transaction_date),
            None => buckets.push(Group {
                merchant,
                amount: txn.debit_amount,
                dates: vec![txn.transaction_date],
            }),
        }
    }

    let mut patterns = Vec::new();
    for group in groups.into_values().flatten() {
        if group.dates.len() < min_occurrences {
            continue;
        }

        let mut dates = group.dates;
        dates.sort();
        dates.dedup();
        if dates.len() < min_occurrences {
            continue;
        }

        let intervals: Vec<i64> = dates
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_days())
            .collect();

        // Modal frequency class across consecutive gaps.
        let mut class_counts: HashMap<PayFrequency, usize> = HashMap::new();
        for interval in &intervals {
            if let Some(class) = classify_interval(*interval) {
                *class_counts.entry(class).or_default() += 1;
            }
        }
        let Some((frequency, _)) = class_counts
            .into_iter()
            .max_by_key(|(_, count)| *count)
        else {
            continue;
        };

        let confidence = pattern_confidence(dates.len(), &intervals);
        patterns.push(AutoPayPattern {
            title: group.merchant.clone(),
            merchant_identifier: group.merchant,
            amount: group.amount,
            frequency,
            occurrence_count: dates.len() as u32,
            confidence,
            last_transaction_date: dates[dates.len() - 1],
        });
    }

    debug!(patterns = patterns.len(), "Auto-pay detection complete");
    patterns
}

/// Confidence from occurrence count and interval regularity. Four or more
/// perfectly regular occurrences score 1.0; three regular occurrences clear
/// the 0.8 materialization floor.
fn pattern_confidence(occurrences: usize, intervals: &[i64]) -> f64 {
    let count_score = (occurrences as f64 / 4.0).min(1.0);

    let regularity = if intervals.is_empty() {
        0.0
    } else {
        let mean = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;
        if mean <= 0.0 {
            0.0
        } else {
            let variance = intervals
                .iter()
                .map(|&i| {
                    let diff = i as f64 - mean;
                    diff * diff
                })
                .sum::<f64>()
                / intervals.len() as f64;
            (1.0 - variance.sqrt() / mean).clamp(0.0, 1.0)
        }
    };

    0.4 * count_score + 0.6 * regularity
}

fn next_due_date(last: NaiveDate, frequency: PayFrequency) -> NaiveDate {
    match frequency {
        PayFrequency::Daily => last + Duration::days(1),
        PayFrequency::Weekly => last + Duration::days(7),
        PayFrequency::Monthly => last
            .checked_add_months(Months::new(1))
            .unwrap_or(last + Duration::days(30)),
    }
}

/// True when an existing recurring deadline already covers the pattern:
/// case-insensitive title substring match plus an amount within tolerance.
fn covered_by_existing(pattern: &AutoPayPattern, existing: &[Deadline]) -> bool {
    let title = pattern.title.to_lowercase();
    existing.iter().any(|deadline| {
        if !deadline.is_recurring {
            return false;
        }
        let existing_title = deadline.title.to_lowercase();
        let title_matches =
            existing_title.contains(&title) || title.contains(&existing_title);
        title_matches && within_tolerance(deadline.amount, pattern.amount, AMOUNT_TOLERANCE)
    })
}

/// Convert qualifying patterns into deadline records. Patterns below the
/// confidence floor or already covered by a deadline are skipped.
pub fn materialize(
    owner_id: Uuid,
    patterns: &[AutoPayPattern],
    existing: &[Deadline],
    confidence_floor: f64,
) -> Vec<Deadline> {
    patterns
        .iter()
        .filter(|p| p.confidence >= confidence_floor)
        .filter(|p| !covered_by_existing(p, existing))
        .map(|p| Deadline {
            deadline_id: Uuid::new_v4(),
            owner_id,
            title: p.title.clone(),
            amount: p.amount,
            due_date: next_due_date(p.last_transaction_date, p.frequency),
            is_recurring: true,
            frequency: Some(p.frequency.as_str().to_string()),
            status: "pending".to_string(),
            created_utc: Utc::now(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BankMetadata, FinancialCategory, ParsingMethod, QualityFlags};

    fn debit(store: &str, amount: i64, date: &str) -> CanonicalTransaction {
        CanonicalTransaction {
            transaction_id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            description: format!("{store} payment"),
            transaction_date: date.parse().unwrap(),
            credit_amount: Decimal::ZERO,
            debit_amount: Decimal::new(amount, 0),
            category: FinancialCategory::Expense,
            category_id: None,
            metadata: BankMetadata {
                store_name: Some(store.to_string()),
                ..Default::default()
            },
            flags: QualityFlags::default(),
            parsing_method: ParsingMethod::Structured,
            parsing_confidence: 1.0,
            is_deleted: false,
        }
    }

    fn deadline(title: &str, amount: i64, recurring: bool) -> Deadline {
        Deadline {
            deadline_id: Uuid::new_v4(),
            owner_id: Uuid::nil(),
            title: title.to_string(),
            amount: Decimal::new(amount, 0),
            due_date: "2024-05-01".parse().unwrap(),
            is_recurring: recurring,
            frequency: Some("monthly".to_string()),
            status: "pending".to_string(),
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn test_monthly_pattern_detected() {
        let txns = vec![
            debit("Netflix", 649, "2024-01-05"),
            debit("Netflix", 649, "2024-02-05"),
            debit("Netflix", 649, "2024-03-05"),
        ];
        let patterns = detect(&txns, 3, AMOUNT_TOLERANCE);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, PayFrequency::Monthly);
        assert_eq!(patterns[0].occurrence_count, 3);
        assert!(patterns[0].confidence >= 0.8);
    }

    #[test]
    fn test_below_min_occurrences_is_ignored() {
        let txns = vec![
            debit("Netflix", 649, "2024-01-05"),
            debit("Netflix", 649, "2024-02-05"),
        ];
        assert!(detect(&txns, 3, AMOUNT_TOLERANCE).is_empty());
    }

    #[test]
    fn test_amount_drift_within_tolerance_stays_one_bucket() {
        let txns = vec![
            debit("Gym", 1000, "2024-01-03"),
            debit("Gym", 1020, "2024-02-03"),
            debit("Gym", 990, "2024-03-03"),
        ];
        let patterns = detect(&txns, 3, AMOUNT_TOLERANCE);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn test_irregular_intervals_lower_confidence() {
        let txns = vec![
            debit("Cafe", 200, "2024-01-01"),
            debit("Cafe", 200, "2024-01-02"),
            debit("Cafe", 200, "2024-02-28"),
            debit("Cafe", 200, "2024-03-04"),
        ];
        for pattern in detect(&txns, 3, AMOUNT_TOLERANCE) {
            assert!(pattern.confidence < 0.8);
        }
    }

    #[test]
    fn test_upi_fallback_merchant_identifier() {
        let mut txns = vec![
            debit("", 500, "2024-01-10"),
            debit("", 500, "2024-01-17"),
            debit("", 500, "2024-01-24"),
        ];
        for txn in &mut txns {
            txn.metadata.store_name = None;
            txn.metadata.upi_id = Some("gym@okhdfc".to_string());
        }
        let patterns = detect(&txns, 3, AMOUNT_TOLERANCE);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].merchant_identifier, "upi:gym@okhdfc");
        assert_eq!(patterns[0].frequency, PayFrequency::Weekly);
    }

    #[test]
    fn test_low_confidence_patterns_never_materialize() {
        let pattern = AutoPayPattern {
            merchant_identifier: "Cafe".to_string(),
            title: "Cafe".to_string(),
            amount: Decimal::new(200, 0),
            frequency: PayFrequency::Weekly,
            occurrence_count: 3,
            confidence: 0.6,
            last_transaction_date: "2024-03-01".parse().unwrap(),
        };
        let deadlines = materialize(Uuid::nil(), &[pattern], &[], 0.8);
        assert!(deadlines.is_empty());
    }

    #[test]
    fn test_existing_deadline_suppresses_pattern() {
        let pattern = AutoPayPattern {
            merchant_identifier: "Netflix".to_string(),
            title: "Netflix".to_string(),
            amount: Decimal::new(649, 0),
            frequency: PayFrequency::Monthly,
            occurrence_count: 4,
            confidence: 0.95,
            last_transaction_date: "2024-04-05".parse().unwrap(),
        };
        let existing = vec![deadline("Netflix Subscription", 649, true)];
        assert!(materialize(Uuid::nil(), &[pattern.clone()], &existing, 0.8).is_empty());

        // A non-recurring deadline with the same title does not suppress.
        let one_off = vec![deadline("Netflix Subscription", 649, false)];
        assert_eq!(materialize(Uuid::nil(), &[pattern], &one_off, 0.8).len(), 1);
    }

    #[test]
    fn test_next_due_date_adds_one_frequency_unit() {
        let last: NaiveDate = "2024-03-31".parse().unwrap();
        assert_eq!(
            next_due_date(last, PayFrequency::Daily),
            "2024-04-01".parse().unwrap()
        );
        assert_eq!(
            next_due_date(last, PayFrequency::Weekly),
            "2024-04-07".parse().unwrap()
        );
        assert_eq!(
            next_due_date(last, PayFrequency::Monthly),
            "2024-04-30".parse().unwrap()
        );
    }
}
