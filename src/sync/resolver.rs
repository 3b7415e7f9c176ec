//! Conflict resolution
//!
//! Applies a caller-chosen policy to a conflict recorded on a batch. Writes
//! go through the same [`ChangeApplier`] the coordinator uses.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::apply::ChangeApplier;
use super::error::{Result, SyncError};
use super::store::BatchStore;
use super::types::{ChangeOperation, ConflictResolution, ResolutionAck, SyncChange};
use crate::audit::{AuditEvent, AuditSink};
use crate::cache::CacheInvalidator;

/// Resolves conflicts flagged during batch processing
#[derive(Clone)]
pub struct ConflictResolver {
    batches: BatchStore,
    applier: ChangeApplier,
    audit: Arc<dyn AuditSink>,
    cache: Arc<dyn CacheInvalidator>,
}

impl ConflictResolver {
    pub fn new(
        batches: BatchStore,
        applier: ChangeApplier,
        audit: Arc<dyn AuditSink>,
        cache: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            batches,
            applier,
            audit,
            cache,
        }
    }

    /// Resolve one conflict of a batch
    ///
    /// Resolving an already-resolved conflict overwrites the recorded
    /// resolution; writes made by the earlier resolution are not undone.
    pub async fn resolve(
        &self,
        batch_id: &str,
        conflict_id: &str,
        resolution: ConflictResolution,
        resolved_payload: Option<Value>,
    ) -> Result<ResolutionAck> {
        let mut batch = self.batches.get(batch_id).await?;

        let index = batch
            .conflicts
            .iter()
            .position(|c| c.id == conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound {
                batch_id: batch_id.to_string(),
                conflict_id: conflict_id.to_string(),
            })?;

        if resolution.requires_payload() && resolved_payload.is_none() {
            return Err(SyncError::InvalidState(format!(
                "{:?} resolution requires a resolved payload",
                resolution
            )));
        }

        let change = batch
            .change(&batch.conflicts[index].change_id)
            .cloned()
            .ok_or_else(|| {
                SyncError::InvalidState(format!(
                    "conflict {} references a change missing from batch {}",
                    conflict_id, batch_id
                ))
            })?;

        let conflict = &batch.conflicts[index];
        let (write, kept_payload) = match resolution {
            ConflictResolution::Local => (None, conflict.local_payload.clone()),
            ConflictResolution::Remote => (Some(change.clone()), change.payload.clone()),
            ConflictResolution::Merge | ConflictResolution::Manual => {
                let merged = SyncChange {
                    operation: ChangeOperation::Update,
                    payload: resolved_payload.clone(),
                    ..change.clone()
                };
                (Some(merged), resolved_payload)
            }
        };

        let applied = match &write {
            Some(write) => {
                let marker = self.resolution_marker(write).await?;
                let applied = self
                    .applier
                    .apply(write, batch.branch_id.as_deref(), marker)
                    .await?;
                tracing::debug!(
                    conflict_id = %conflict_id,
                    action = applied.action(),
                    "Applied conflict resolution"
                );
                true
            }
            None => false,
        };

        let conflict = &mut batch.conflicts[index];
        conflict.resolution = Some(resolution);
        conflict.resolved_payload = kept_payload;
        conflict.resolved_at = Some(Utc::now());
        let entity_kind = conflict.entity_kind;
        let entity_id = conflict.entity_id.clone();

        if applied && !batch.applied_change_ids.contains(&change.id) {
            batch.applied_change_ids.push(change.id.clone());
        }

        self.batches.save(&batch).await?;

        let event = AuditEvent::entity(
            "conflict_resolved",
            entity_kind,
            &entity_id,
            json!({
                "batchId": batch.batch_id,
                "conflictId": conflict_id,
                "resolution": resolution,
                "applied": applied,
            }),
        );
        if let Err(e) = self.audit.record(event).await {
            tracing::warn!(conflict_id = %conflict_id, error = %e, "Failed to record audit event");
        }

        if applied {
            self.cache.invalidate(&[entity_kind]).await;
        }

        let remaining_conflicts = batch.unresolved_conflicts();
        tracing::info!(
            batch_id = %batch.batch_id,
            conflict_id = %conflict_id,
            resolution = ?resolution,
            remaining = remaining_conflicts,
            "Resolved conflict"
        );

        Ok(ResolutionAck {
            batch_id: batch.batch_id,
            conflict_id: conflict_id.to_string(),
            resolution,
            applied,
            remaining_conflicts,
        })
    }

    /// Modification marker for a resolution write: now, or just past the
    /// stored marker when that lies ahead of this clock
    async fn resolution_marker(&self, change: &SyncChange) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        Ok(match self.applier.current(change).await? {
            Some(current) if current.updated_at >= now => {
                current.updated_at + Duration::milliseconds(1)
            }
            _ => now,
        })
    }
}
