pub mod audit;
pub mod classifier;
pub mod database;
pub mod metrics;
pub mod resolver;
pub mod store;

pub use audit::{AuditSink, TracingAuditSink};
pub use classifier::{GenaiClassifier, TransactionClassifier};
pub use database::Database;
pub use resolver::{AliasTableResolver, NameResolver};
pub use store::{CategoryLookup, DeadlineStore, StatementStore, TransactionStore};
