//! Prometheus metrics for statement-import-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for import operations by status.
pub static IMPORT_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_operations_total",
        "Total number of statement import operations",
        &["status"]
    )
    .expect("Failed to register IMPORT_OPERATIONS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "import_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Counter for normalized records by quality flag.
pub static RECORDS_NORMALIZED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_records_normalized_total",
        "Total number of records normalized",
        &["quality"]
    )
    .expect("Failed to register RECORDS_NORMALIZED")
});

/// Counter for duplicates skipped by dedup phase.
pub static DUPLICATES_SKIPPED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_duplicates_skipped_total",
        "Total number of duplicate records skipped",
        &["phase"]
    )
    .expect("Failed to register DUPLICATES_SKIPPED")
});

/// Counter for categorization outcomes.
pub static CATEGORIZATION_RESULTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_categorization_results_total",
        "Total number of categorization outcomes",
        &["outcome"]
    )
    .expect("Failed to register CATEGORIZATION_RESULTS")
});

/// Counter for detected auto-pay patterns.
pub static AUTOPAY_PATTERNS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_autopay_patterns_total",
        "Total number of auto-pay patterns by outcome",
        &["outcome"]
    )
    .expect("Failed to register AUTOPAY_PATTERNS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&IMPORT_OPERATIONS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&RECORDS_NORMALIZED);
    Lazy::force(&DUPLICATES_SKIPPED);
    Lazy::force(&CATEGORIZATION_RESULTS);
    Lazy::force(&AUTOPAY_PATTERNS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Record an import operation.
pub fn record_import_operation(status: &str) {
    IMPORT_OPERATIONS.with_label_values(&[status]).inc();
}

/// Record a normalized record.
pub fn record_normalized(quality: &str) {
    RECORDS_NORMALIZED.with_label_values(&[quality]).inc();
}

/// Record skipped duplicates.
pub fn record_duplicates(phase: &str, count: u64) {
    DUPLICATES_SKIPPED
        .with_label_values(&[phase])
        .inc_by(count as f64);
}

/// Record categorization outcomes.
pub fn record_categorization(outcome: &str, count: u64) {
    CATEGORIZATION_RESULTS
        .with_label_values(&[outcome])
        .inc_by(count as f64);
}

/// Record an auto-pay pattern outcome.
pub fn record_autopay_pattern(outcome: &str) {
    AUTOPAY_PATTERNS.with_label_values(&[outcome]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
