//! Fire-and-forget audit event sink.

use async_trait::async_trait;
use uuid::Uuid;

/// Audit events are best-effort: the pipeline spawns `record` calls and
/// never waits on or inspects their outcome.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &str, actor: Uuid, metadata: serde_json::Value);
}

/// Sink that emits audit events to the structured log stream.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &str, actor: Uuid, metadata: serde_json::Value) {
        tracing::info!(
            target: "audit",
            event = event,
            actor = %actor,
            metadata = %metadata,
            "Audit event"
        );
    }
}
