//! Statement Import Service - bank statement ingestion, deduplication,
//! reconciliation and categorization.

pub mod config;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod startup;
