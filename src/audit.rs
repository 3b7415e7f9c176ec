//! Audit trail seam
//!
//! The sync core reports every applied change and every batch-level event
//! (batch created, conflict resolved) to an injected [`AuditSink`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::store::{EntityKind, StoreError};

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_kind: Option<EntityKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub details: Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Event about a single entity
    pub fn entity(action: &str, kind: EntityKind, entity_id: &str, details: Value) -> Self {
        Self {
            action: action.to_string(),
            entity_kind: Some(kind),
            entity_id: Some(entity_id.to_string()),
            details,
            recorded_at: Utc::now(),
        }
    }

    /// Event not tied to one entity
    pub fn system(action: &str, details: Value) -> Self {
        Self {
            action: action.to_string(),
            entity_kind: None,
            entity_id: None,
            details,
            recorded_at: Utc::now(),
        }
    }
}

/// Receiver of audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError>;
}

/// Emits audit events as structured tracing events
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        tracing::info!(
            target: "audit",
            action = %event.action,
            entity_kind = ?event.entity_kind,
            entity_id = ?event.entity_id,
            details = %event.details,
            "audit"
        );
        Ok(())
    }
}

/// Persists audit events to the `audit_log` table
#[derive(Clone)]
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent events for an entity, newest first
    pub async fn events_for(&self, kind: EntityKind, entity_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT action, details, recorded_at
            FROM audit_log
            WHERE entity_kind = ? AND entity_id = ?
            ORDER BY id DESC
            "#,
        )
        .bind(kind.as_str())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(action, details, recorded_at)| {
                let recorded_at = DateTime::parse_from_rfc3339(&recorded_at)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?
                    .with_timezone(&Utc);
                Ok(AuditEvent {
                    action,
                    entity_kind: Some(kind),
                    entity_id: Some(entity_id.to_string()),
                    details: serde_json::from_str(&details)?,
                    recorded_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (action, entity_kind, entity_id, details, recorded_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.action)
        .bind(event.entity_kind.map(|k| k.as_str()))
        .bind(&event.entity_id)
        .bind(event.details.to_string())
        .bind(event.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Collects events in memory so tests can assert on side effects
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingAuditSink {
    events: parking_lot::Mutex<Vec<AuditEvent>>,
}

#[cfg(test)]
impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded actions, in order
    pub fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }
}

#[cfg(test)]
#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_sink_persists_events() {
        let pool = create_memory_pool().await.unwrap();
        let sink = SqliteAuditSink::new(pool);

        sink.record(AuditEvent::entity("create", EntityKind::Product, "p-1", json!({"batchId": "b-1"})))
            .await
            .unwrap();
        sink.record(AuditEvent::entity("update", EntityKind::Product, "p-1", json!({})))
            .await
            .unwrap();
        sink.record(AuditEvent::system("batch_created", json!({})))
            .await
            .unwrap();

        let events = sink.events_for(EntityKind::Product, "p-1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "update");
        assert_eq!(events[1].details["batchId"], "b-1");
    }

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingAuditSink::new();
        sink.record(AuditEvent::system("a", json!({}))).await.unwrap();
        sink.record(AuditEvent::system("b", json!({}))).await.unwrap();
        assert_eq!(sink.actions(), vec!["a", "b"]);
        assert!(sink.events().iter().all(|e| e.entity_kind.is_none()));
    }
}
