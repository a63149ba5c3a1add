//! Canonical-name resolution for merchant and person names.
//!
//! Statements spell the same merchant a dozen ways; the resolver maps raw
//! spellings to a canonical name before dedup keys are built and before
//! persistence, so equivalent rows compare equal.

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Merchant,
    Person,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merchant => "merchant",
            Self::Person => "person",
        }
    }
}

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve raw names to canonical names. Names without an alias entry
    /// are absent from the returned map and should be used as-is.
    async fn resolve_batch(
        &self,
        owner_id: Uuid,
        names: &[String],
        kind: EntityKind,
    ) -> Result<HashMap<String, String>, AppError>;
}

/// Alias-table backed resolver.
#[derive(Clone)]
pub struct AliasTableResolver {
    pool: PgPool,
}

impl AliasTableResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NameResolver for AliasTableResolver {
    #[instrument(skip(self, names), fields(owner_id = %owner_id, count = names.len()))]
    async fn resolve_batch(
        &self,
        owner_id: Uuid,
        names: &[String],
        kind: EntityKind,
    ) -> Result<HashMap<String, String>, AppError> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }

        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT alias, canonical_name
            FROM entity_aliases
            WHERE owner_id = $1 AND entity_kind = $2 AND alias = ANY($3)
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(names)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to resolve names: {}", e)))?;

        Ok(rows.into_iter().collect())
    }
}
