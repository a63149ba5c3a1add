//! service-core: Shared infrastructure for the statement import services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod retry;

pub use async_trait;
pub use axum;
pub use serde;
pub use tokio;
pub use tracing;
pub use validator;
