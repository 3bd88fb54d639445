//! Decision audit seam. The engine itself is side-effect-free; the caller
//! reports each outcome through a sink after the decision has been made, so
//! a sink failure can never change an already-returned verdict.

use serde_json::Value;

#[derive(Debug)]
pub struct AuditEvent<'a> {
    pub principal_id: &'a str,
    pub resource: &'a str,
    pub action: &'a str,
    pub allowed: bool,
    pub metadata: Value,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent<'_>);
}

/// Default sink: one structured log line per decision.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent<'_>) {
        tracing::info!(
            principal = event.principal_id,
            resource = event.resource,
            action = event.action,
            allowed = event.allowed,
            metadata = %event.metadata,
            "access decision"
        );
    }
}
