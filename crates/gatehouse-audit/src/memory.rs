//! In-memory audit sink for tests and development.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use gatehouse_types::protocol::{CallRecord, NewCallRecord};
use gatehouse_types::traits::AuditSink;
use gatehouse_types::GatewayError;

/// Stores records in a `Vec` behind an `Arc<RwLock>`. Implements the full
/// [`AuditSink`] trait and doubles as a fake in other modules' tests.
#[derive(Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<RwLock<Vec<CallRecord>>>,
    next_id: Arc<AtomicI64>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Snapshot of all stored records in insertion order.
    pub async fn all(&self) -> Vec<CallRecord> {
        self.records.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_call(&self, record: NewCallRecord) -> Result<(), GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.records.write().await.push(CallRecord {
            id,
            timestamp: Utc::now(),
            upstream: record.upstream,
            tool: record.tool,
            arguments: record.arguments,
            status: record.status,
            error: record.error,
            duration_ms: record.duration_ms,
        });
        Ok(())
    }

    async fn recent_calls(&self, limit: u32) -> Result<Vec<CallRecord>, GatewayError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_types::protocol::CallStatus;

    #[tokio::test]
    async fn recent_returns_newest_first() {
        let sink = MemoryAuditSink::new();
        for tool in ["a", "b", "c"] {
            sink.record_call(NewCallRecord {
                upstream: "u".into(),
                tool: tool.into(),
                arguments: "{}".into(),
                status: CallStatus::Success,
                error: String::new(),
                duration_ms: 1,
            })
            .await
            .unwrap();
        }
        let calls = sink.recent_calls(2).await.unwrap();
        assert_eq!(calls[0].tool, "c");
        assert_eq!(calls[1].tool, "b");
        assert_eq!(sink.count().await, 3);
    }
}
