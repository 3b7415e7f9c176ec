//! Batch Coordinator
//!
//! Owns the lifecycle of a sync batch:
//! - Creation and persistence
//! - Sequential processing through detection and apply
//! - Retry of failed batches
//! - Retention cleanup

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::json;

use super::apply::{Applied, ChangeApplier};
use super::detector::ConflictDetector;
use super::error::{Result, SyncError};
use super::store::BatchStore;
use super::types::{
    BatchStats, BatchStatus, ChangeError, NewBatch, SyncBatch, SyncChange, SyncConflict,
    SyncResult,
};
use crate::audit::{AuditEvent, AuditSink};
use crate::cache::CacheInvalidator;
use crate::store::EntityKind;

/// Result of one change within a batch run
enum ChangeOutcome {
    Applied(Applied),
    Conflicted(SyncConflict),
}

/// Per-run counters
#[derive(Default)]
struct RunTally {
    processed: usize,
    failed: usize,
    conflicts: Vec<SyncConflict>,
    errors: Vec<ChangeError>,
    touched: BTreeSet<EntityKind>,
}

impl RunTally {
    fn status(&self) -> BatchStatus {
        if self.failed > 0 {
            BatchStatus::Failed
        } else if !self.conflicts.is_empty() {
            BatchStatus::Conflicted
        } else {
            BatchStatus::Completed
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Coordinates batch creation, processing, retry and cleanup
#[derive(Clone)]
pub struct BatchCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    batches: BatchStore,
    applier: ChangeApplier,
    detector: ConflictDetector,
    audit: Arc<dyn AuditSink>,
    cache: Arc<dyn CacheInvalidator>,
    max_retries: u32,
}

impl BatchCoordinator {
    pub fn new(
        batches: BatchStore,
        applier: ChangeApplier,
        audit: Arc<dyn AuditSink>,
        cache: Arc<dyn CacheInvalidator>,
        max_retries: u32,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                batches,
                applier,
                detector: ConflictDetector::new(),
                audit,
                cache,
                max_retries,
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create and persist a pending batch
    pub async fn create_batch(&self, request: NewBatch) -> Result<SyncBatch> {
        let batch = SyncBatch::new(request, self.inner.max_retries);
        self.inner.batches.save(&batch).await?;

        self.audit(AuditEvent::system(
            "batch_created",
            json!({
                "batchId": batch.batch_id,
                "deviceId": batch.device_id,
                "branchId": batch.branch_id,
                "changeCount": batch.changes.len(),
            }),
        ))
        .await;

        tracing::info!(
            batch_id = %batch.batch_id,
            device_id = %batch.device_id,
            changes = batch.changes.len(),
            "Created sync batch"
        );

        Ok(batch)
    }

    /// Load a batch by its public id
    pub async fn get_batch(&self, batch_id: &str) -> Result<SyncBatch> {
        self.inner.batches.get(batch_id).await
    }

    /// Process a pending batch, applying its changes in order
    pub async fn process_batch(&self, batch_id: &str) -> Result<SyncResult> {
        let mut batch = self.inner.batches.get(batch_id).await?;
        if batch.status != BatchStatus::Pending {
            return Err(SyncError::InvalidBatchState {
                batch_id: batch.batch_id,
                status: batch.status,
                expected: BatchStatus::Pending,
            });
        }

        let started = Instant::now();
        batch.status = BatchStatus::Processing;
        batch.started_at = Some(Utc::now());
        batch.completed_at = None;
        batch.error = None;
        batch.errors.clear();
        // Unresolved conflicts are detected again on this run
        batch.conflicts.retain(SyncConflict::is_resolved);
        self.inner.batches.save(&batch).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            changes = batch.changes.len(),
            retry = batch.retry_count,
            "Processing sync batch"
        );

        let tally = self.run_changes(&mut batch).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        batch.status = tally.status();
        batch.completed_at = Some(Utc::now());
        batch.duration_ms = Some(duration_ms);
        batch.errors = tally.errors.clone();
        batch.conflicts.extend(tally.conflicts.iter().cloned());

        if let Err(e) = self.inner.batches.save(&batch).await {
            self.mark_failed(&mut batch, &e).await;
            return Err(e);
        }

        if !tally.touched.is_empty() {
            let kinds: Vec<EntityKind> = tally.touched.iter().copied().collect();
            self.inner.cache.invalidate(&kinds).await;
        }

        tracing::info!(
            batch_id = %batch.batch_id,
            status = %batch.status,
            processed = tally.processed,
            failed = tally.failed,
            conflicted = tally.conflicts.len(),
            duration_ms,
            "Processed sync batch"
        );

        Ok(SyncResult {
            batch_id: batch.batch_id,
            status: batch.status,
            processed_count: tally.processed,
            failed_count: tally.failed,
            conflicted_count: tally.conflicts.len(),
            conflicts: tally.conflicts,
            errors: tally.errors,
            duration_ms,
        })
    }

    /// Reset a failed batch to pending and process it again
    pub async fn retry_batch(&self, batch_id: &str) -> Result<SyncResult> {
        let mut batch = self.inner.batches.get(batch_id).await?;
        if batch.status != BatchStatus::Failed {
            return Err(SyncError::InvalidBatchState {
                batch_id: batch.batch_id,
                status: batch.status,
                expected: BatchStatus::Failed,
            });
        }
        if batch.retry_count >= batch.max_retries {
            return Err(SyncError::RetryExhausted {
                batch_id: batch.batch_id,
                retry_count: batch.retry_count,
                max_retries: batch.max_retries,
            });
        }

        batch.retry_count += 1;
        batch.status = BatchStatus::Pending;
        batch.error = None;
        batch.errors.clear();
        self.inner.batches.save(&batch).await?;

        tracing::info!(
            batch_id = %batch.batch_id,
            retry = batch.retry_count,
            max_retries = batch.max_retries,
            "Retrying sync batch"
        );

        self.process_batch(batch_id).await
    }

    /// Purge completed and failed batches created before the retention window
    ///
    /// `retention_days` must be non-negative and small enough for the cutoff
    /// to be a representable time.
    pub async fn cleanup_old_batches(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Some(retention_days)
            .filter(|days| *days >= 0)
            .and_then(Duration::try_days)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or(SyncError::InvalidRetention(retention_days))?;
        let mut removed = 0;

        for batch in self.inner.batches.list().await? {
            if batch.status.is_purgeable() && batch.created_at < cutoff {
                self.inner.batches.delete(&batch.batch_id).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, retention_days, "Cleaned up old sync batches");
        }

        Ok(removed)
    }

    /// Aggregate counts over all batches, optionally for one branch
    pub async fn get_batch_stats(&self, branch_id: Option<&str>) -> Result<BatchStats> {
        let mut stats = BatchStats::default();
        for batch in self.inner.batches.list().await? {
            if branch_id.map_or(true, |b| batch.branch_id.as_deref() == Some(b)) {
                stats.add(&batch);
            }
        }
        Ok(stats)
    }

    /// Start background retention cleanup
    pub fn start_cleanup_task(
        self,
        every: std::time::Duration,
        retention_days: i64,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                if let Err(e) = self.cleanup_old_batches(retention_days).await {
                    tracing::error!(error = %e, "Batch cleanup failed");
                }
            }
        })
    }

    // ========================================================================
    // Change Processing
    // ========================================================================

    async fn run_changes(&self, batch: &mut SyncBatch) -> RunTally {
        let mut tally = RunTally::default();
        let changes = batch.changes.clone();

        for change in &changes {
            let settled = batch.applied_change_ids.contains(&change.id)
                || batch.conflicts.iter().any(|c| c.change_id == change.id);
            if settled {
                tracing::debug!(change_id = %change.id, "Skipping settled change");
                tally.processed += 1;
                continue;
            }

            match self.process_change(change, batch.branch_id.as_deref()).await {
                Ok(ChangeOutcome::Applied(applied)) => {
                    tally.processed += 1;
                    tally.touched.insert(change.entity_kind);
                    batch.applied_change_ids.push(change.id.clone());
                    self.audit_applied(batch, change, &applied).await;
                }
                Ok(ChangeOutcome::Conflicted(conflict)) => {
                    tracing::debug!(
                        change_id = %change.id,
                        entity_id = %change.entity_id,
                        conflict_type = ?conflict.conflict_type,
                        "Change conflicts with stored entity"
                    );
                    tally.conflicts.push(conflict);
                }
                Err(e) => {
                    tracing::warn!(
                        batch_id = %batch.batch_id,
                        change_id = %change.id,
                        error = %e,
                        "Failed to apply change"
                    );
                    tally.failed += 1;
                    tally.errors.push(ChangeError::new(change, e.to_string()));
                }
            }
        }

        tally
    }

    async fn process_change(
        &self,
        change: &SyncChange,
        branch_id: Option<&str>,
    ) -> Result<ChangeOutcome> {
        let current = self.inner.applier.current(change).await?;

        if let Some(conflict) = self.inner.detector.detect(change, current.as_ref()) {
            return Ok(ChangeOutcome::Conflicted(conflict));
        }

        let applied = self
            .inner
            .applier
            .apply(change, branch_id, change.timestamp)
            .await?;
        Ok(ChangeOutcome::Applied(applied))
    }

    async fn audit_applied(&self, batch: &SyncBatch, change: &SyncChange, applied: &Applied) {
        self.audit(AuditEvent::entity(
            &format!("sync_{}", applied.action()),
            change.entity_kind,
            &change.entity_id,
            json!({
                "batchId": batch.batch_id,
                "changeId": change.id,
                "actorId": change.actor_id,
                "deviceId": batch.device_id,
            }),
        ))
        .await;
    }

    async fn audit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(e) = self.inner.audit.record(event).await {
            tracing::warn!(action = %action, error = %e, "Failed to record audit event");
        }
    }

    /// Best-effort transition to failed after an infrastructure error
    async fn mark_failed(&self, batch: &mut SyncBatch, error: &SyncError) {
        batch.status = BatchStatus::Failed;
        batch.error = Some(error.to_string());

        tracing::error!(batch_id = %batch.batch_id, error = %error, "Sync batch failed");

        if let Err(e) = self.inner.batches.save(batch).await {
            tracing::error!(
                batch_id = %batch.batch_id,
                error = %e,
                "Could not persist failed batch"
            );
        }
    }
}
