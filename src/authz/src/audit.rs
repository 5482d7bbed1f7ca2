//! Audit tagging for state-changing requests
//!
//! The pipeline attaches an [`AuditEntry`] to every non-GET, non-public
//! request and hands it to an [`AuditSink`]. Sinks must not block the
//! request path.

use crate::types::{AuthKind, OrgId, TeamId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Metadata recorded for one state-changing request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub request_id: Uuid,
    pub operation_id: String,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_kind: Option<AuthKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<OrgId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit entries
pub trait AuditSink: Send + Sync {
    /// Accept an entry without blocking
    fn record(&self, entry: AuditEntry);
}

/// Sink that writes entries to the `audit` tracing target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            request_id = %entry.request_id,
            operation = %entry.operation_id,
            method = %entry.method,
            path = %entry.path,
            user_id = ?entry.user_id,
            org_id = ?entry.org_id,
            team_id = ?entry.team_id,
            "audit"
        );
    }
}

/// Sink that forwards entries over a bounded channel; drops when full
#[derive(Debug, Clone)]
pub struct ChannelAuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl ChannelAuditSink {
    /// Create a sink and the receiver an audit consumer drains
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<AuditEntry>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.tx.try_send(entry) {
            warn!("Dropping audit entry: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(operation: &str) -> AuditEntry {
        AuditEntry {
            request_id: Uuid::new_v4(),
            operation_id: operation.to_string(),
            method: "PUT".to_string(),
            path: "/admin/roles/4/permissions".to_string(),
            user_id: Some(1),
            auth_kind: Some(AuthKind::Jwt),
            org_id: None,
            team_id: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelAuditSink::new(4);
        sink.record(entry("sys:roles:update"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.operation_id, "sys:roles:update");
    }

    #[tokio::test]
    async fn test_channel_sink_never_blocks_when_full() {
        let (sink, mut rx) = ChannelAuditSink::new(1);
        sink.record(entry("a:b:c"));
        sink.record(entry("d:e:f"));

        assert_eq!(rx.recv().await.unwrap().operation_id, "a:b:c");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_entry_serialization_skips_empty_context() {
        let json = serde_json::to_value(entry("sys:roles:update")).unwrap();
        assert!(json.get("org_id").is_none());
        assert_eq!(json["auth_kind"], "jwt");
    }
}
