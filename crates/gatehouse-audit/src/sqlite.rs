//! SQLite-backed audit sink.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

use gatehouse_types::protocol::{CallRecord, CallStatus, NewCallRecord};
use gatehouse_types::traits::AuditSink;
use gatehouse_types::GatewayError;

/// Schema for the audit table. Rows are append-only; timestamps are stored
/// as RFC 3339 text so lexical order matches chronological order.
const CREATE_REQUEST_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS request_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    upstream TEXT NOT NULL,
    tool TEXT NOT NULL,
    arguments TEXT,
    status TEXT,
    error TEXT,
    duration_ms INTEGER
)
"#;

const CREATE_TIMESTAMP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs(timestamp DESC)";

/// Durable audit sink over a local SQLite file.
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    /// Open (creating if missing) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: &Path) -> Result<Self, GatewayError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Audit(format!("create {}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| GatewayError::Audit(format!("open {}: {e}", path.display())))?;

        let sink = Self { pool };
        sink.migrate().await?;
        info!(path = %path.display(), "audit database ready");
        Ok(sink)
    }

    /// An in-memory database with the production schema, for tests.
    pub async fn open_in_memory() -> Result<Self, GatewayError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| GatewayError::Audit(e.to_string()))?;
        // Every pooled connection to :memory: would get its own database;
        // a single connection keeps the schema visible.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| GatewayError::Audit(format!("open in-memory db: {e}")))?;
        let sink = Self { pool };
        sink.migrate().await?;
        Ok(sink)
    }

    async fn migrate(&self) -> Result<(), GatewayError> {
        sqlx::query(CREATE_REQUEST_LOGS_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::Audit(format!("create request_logs: {e}")))?;
        sqlx::query(CREATE_TIMESTAMP_INDEX)
            .execute(&self.pool)
            .await
            .map_err(|e| GatewayError::Audit(format!("create timestamp index: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record_call(&self, record: NewCallRecord) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO request_logs (timestamp, upstream, tool, arguments, status, error, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(&record.upstream)
        .bind(&record.tool)
        .bind(&record.arguments)
        .bind(record.status.as_str())
        .bind(&record.error)
        .bind(record.duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| GatewayError::Audit(format!("insert record: {e}")))?;
        Ok(())
    }

    async fn recent_calls(&self, limit: u32) -> Result<Vec<CallRecord>, GatewayError> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, upstream, tool, arguments, status, error, duration_ms
            FROM request_logs
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GatewayError::Audit(format!("query records: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let raw_timestamp: String = row.get("timestamp");
                let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| GatewayError::Audit(format!("parse timestamp: {e}")))?;
                let raw_status: String = row.get("status");
                let status = if raw_status == "error" {
                    CallStatus::Error
                } else {
                    CallStatus::Success
                };
                Ok(CallRecord {
                    id: row.get("id"),
                    timestamp,
                    upstream: row.get("upstream"),
                    tool: row.get("tool"),
                    arguments: row.get("arguments"),
                    status,
                    error: row.get("error"),
                    duration_ms: row.get("duration_ms"),
                })
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(upstream: &str, tool: &str, status: CallStatus) -> NewCallRecord {
        NewCallRecord {
            upstream: upstream.to_string(),
            tool: tool.to_string(),
            arguments: "{\"x\":1}".to_string(),
            status,
            error: match status {
                CallStatus::Success => String::new(),
                CallStatus::Error => "boom".to_string(),
            },
            duration_ms: 12,
        }
    }

    #[tokio::test]
    async fn records_round_trip() {
        let sink = SqliteAuditSink::open_in_memory().await.unwrap();
        sink.record_call(record("echo", "echo", CallStatus::Success))
            .await
            .unwrap();
        sink.record_call(record("risky", "delete", CallStatus::Error))
            .await
            .unwrap();

        let calls = sink.recent_calls(10).await.unwrap();
        assert_eq!(calls.len(), 2);
        // Newest first.
        assert_eq!(calls[0].upstream, "risky");
        assert_eq!(calls[0].status, CallStatus::Error);
        assert_eq!(calls[0].error, "boom");
        assert_eq!(calls[1].upstream, "echo");
        assert_eq!(calls[1].status, CallStatus::Success);
        assert_eq!(calls[1].arguments, "{\"x\":1}");
        assert_eq!(calls[1].duration_ms, 12);
    }

    #[tokio::test]
    async fn limit_is_applied() {
        let sink = SqliteAuditSink::open_in_memory().await.unwrap();
        for i in 0..5 {
            sink.record_call(record("echo", &format!("t{i}"), CallStatus::Success))
                .await
                .unwrap();
        }
        let calls = sink.recent_calls(3).await.unwrap();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].tool, "t4");
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let sink = SqliteAuditSink::open_in_memory().await.unwrap();
        for _ in 0..3 {
            sink.record_call(record("echo", "echo", CallStatus::Success))
                .await
                .unwrap();
        }
        let calls = sink.recent_calls(10).await.unwrap();
        let ids: Vec<i64> = calls.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }
}
