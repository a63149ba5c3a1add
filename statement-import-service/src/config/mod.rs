//! Configuration module for statement-import-service.

use rust_decimal::Decimal;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct ImportServiceConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub url: String,
}

/// Tunables for the import pipeline phases.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Opening balance mismatch below this is accepted silently.
    pub balance_tolerance: Decimal,
    /// Mismatch at or above this is a hard reconciliation error.
    pub balance_hard_threshold: Decimal,
    /// Number of persistence chunks in flight at once.
    pub chunk_concurrency: usize,
    /// Maximum transactions per classifier call.
    pub ai_batch_limit: usize,
    /// Inserted-row count above which categorization moves to background.
    pub large_import_threshold: usize,
    /// Raw batch size that also forces background mode when AI is enabled.
    pub medium_batch_threshold: usize,
    /// History window consulted by cross-import dedup, in days.
    pub history_window_days: i64,
    /// Minimum occurrences before a recurring pattern is considered.
    pub autopay_min_occurrences: usize,
    /// Minimum pattern confidence for deadline creation.
    pub autopay_confidence_floor: f64,
    /// Relative amount tolerance when bucketing recurring payments.
    pub amount_bucket_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            balance_tolerance: Decimal::new(100, 2),
            balance_hard_threshold: Decimal::new(50000, 2),
            chunk_concurrency: 4,
            ai_batch_limit: 50,
            large_import_threshold: 100,
            medium_batch_threshold: 250,
            history_window_days: 30,
            autopay_min_occurrences: 3,
            autopay_confidence_floor: 0.8,
            amount_bucket_tolerance: 0.05,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl ImportServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = PipelineConfig::default();

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| "statement-import-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").map_err(|_| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            },
            classifier: ClassifierConfig {
                url: env::var("GENAI_SERVICE_URL")
                    .unwrap_or_else(|_| "http://genai-service:3001".to_string()),
            },
            pipeline: PipelineConfig {
                balance_tolerance: env_parse("BALANCE_TOLERANCE", defaults.balance_tolerance),
                balance_hard_threshold: env_parse(
                    "BALANCE_HARD_THRESHOLD",
                    defaults.balance_hard_threshold,
                ),
                chunk_concurrency: env_parse("CHUNK_CONCURRENCY", defaults.chunk_concurrency),
                ai_batch_limit: env_parse("AI_BATCH_LIMIT", defaults.ai_batch_limit),
                large_import_threshold: env_parse(
                    "LARGE_IMPORT_THRESHOLD",
                    defaults.large_import_threshold,
                ),
                medium_batch_threshold: env_parse(
                    "MEDIUM_BATCH_THRESHOLD",
                    defaults.medium_batch_threshold,
                ),
                history_window_days: env_parse("HISTORY_WINDOW_DAYS", defaults.history_window_days),
                autopay_min_occurrences: env_parse(
                    "AUTOPAY_MIN_OCCURRENCES",
                    defaults.autopay_min_occurrences,
                ),
                autopay_confidence_floor: env_parse(
                    "AUTOPAY_CONFIDENCE_FLOOR",
                    defaults.autopay_confidence_floor,
                ),
                amount_bucket_tolerance: env_parse(
                    "AMOUNT_BUCKET_TOLERANCE",
                    defaults.amount_bucket_tolerance,
                ),
            },
        })
    }
}
