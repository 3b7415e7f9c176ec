//! Sync service facade
//!
//! One cloneable handle over the coordinator, resolver, feed builder and
//! session manager, sharing a single set of collaborators.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::audit::AuditSink;
use crate::config::SyncConfig;
use crate::offline::{
    require_capability, Capability, NewSession, OfflineDataPackage, OfflineSession,
    OfflineSessionManager, QueuedChange, SaveResult,
};
use crate::store::{ChangeCursor, EntityKind, EntityRegistry, KeyValueStore};
use crate::sync::{
    BatchCoordinator, BatchStats, BatchStore, ChangeApplier, ChangeFeed, ChangeFeedBuilder,
    ConflictResolution, ConflictResolver, FeedCache, NewBatch, ResolutionAck, Result, SyncBatch,
    SyncChange, SyncDirection, SyncResult, SyncType,
};

#[derive(Clone)]
pub struct SyncService {
    coordinator: BatchCoordinator,
    resolver: ConflictResolver,
    feeds: ChangeFeedBuilder,
    sessions: OfflineSessionManager,
    config: SyncConfig,
}

impl SyncService {
    /// Wire the core over the given collaborators
    ///
    /// The feed cache doubles as the cache invalidator, so batch completion
    /// and conflict resolution drop stale feed pages.
    pub fn new(
        registry: Arc<EntityRegistry>,
        kv: Arc<dyn KeyValueStore>,
        audit: Arc<dyn AuditSink>,
        config: SyncConfig,
    ) -> Self {
        let batches = BatchStore::new(kv.clone());
        let applier = ChangeApplier::new(registry.clone());
        let feed_cache = Arc::new(FeedCache::new(
            config.feed_cache_capacity,
            config.feed_cache_ttl(),
        ));

        Self {
            coordinator: BatchCoordinator::new(
                batches.clone(),
                applier.clone(),
                audit.clone(),
                feed_cache.clone(),
                config.max_retries,
            ),
            resolver: ConflictResolver::new(batches, applier, audit, feed_cache.clone()),
            feeds: ChangeFeedBuilder::new(registry.clone(), feed_cache, config.feed_page_size),
            sessions: OfflineSessionManager::new(kv, registry, config.clone()),
            config,
        }
    }

    pub fn coordinator(&self) -> &BatchCoordinator {
        &self.coordinator
    }

    pub fn sessions(&self) -> &OfflineSessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ========================================================================
    // Batches
    // ========================================================================

    pub async fn create_batch(&self, request: NewBatch) -> Result<SyncBatch> {
        self.coordinator.create_batch(request).await
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<SyncBatch> {
        self.coordinator.get_batch(batch_id).await
    }

    pub async fn process_batch(&self, batch_id: &str) -> Result<SyncResult> {
        self.coordinator.process_batch(batch_id).await
    }

    pub async fn retry_batch(&self, batch_id: &str) -> Result<SyncResult> {
        self.coordinator.retry_batch(batch_id).await
    }

    pub async fn resolve_conflict(
        &self,
        batch_id: &str,
        conflict_id: &str,
        resolution: ConflictResolution,
        resolved_payload: Option<Value>,
    ) -> Result<ResolutionAck> {
        self.resolver
            .resolve(batch_id, conflict_id, resolution, resolved_payload)
            .await
    }

    /// Purge old batches, using the configured retention when none is given
    pub async fn cleanup_old_batches(&self, retention_days: Option<i64>) -> Result<usize> {
        let days = retention_days.unwrap_or(self.config.batch_retention_days);
        self.coordinator.cleanup_old_batches(days).await
    }

    pub async fn get_batch_stats(&self, branch_id: Option<&str>) -> Result<BatchStats> {
        self.coordinator.get_batch_stats(branch_id).await
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    pub async fn build_feed(
        &self,
        kind: EntityKind,
        since: Option<&ChangeCursor>,
        branch_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ChangeFeed> {
        self.feeds.build_feed(kind, since, branch_id, limit).await
    }

    // ========================================================================
    // Offline Sessions
    // ========================================================================

    pub async fn create_session(&self, request: NewSession) -> Result<OfflineSession> {
        self.sessions.create_session(request).await
    }

    pub async fn validate_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.validate_session(session_id).await
    }

    pub async fn update_activity(&self, session_id: &str) -> Result<OfflineSession> {
        self.sessions.update_activity(session_id).await
    }

    pub async fn suspend_session(&self, session_id: &str) -> Result<OfflineSession> {
        self.sessions.suspend_session(session_id).await
    }

    pub async fn resume_session(&self, session_id: &str) -> Result<OfflineSession> {
        self.sessions.resume_session(session_id).await
    }

    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        self.sessions.end_session(session_id).await
    }

    pub async fn get_device_sessions(&self, device_id: &str) -> Result<Vec<OfflineSession>> {
        self.sessions.get_device_sessions(device_id).await
    }

    pub async fn create_data_package(
        &self,
        session_id: &str,
        kinds: Option<Vec<EntityKind>>,
    ) -> Result<OfflineDataPackage> {
        self.sessions.create_data_package(session_id, kinds).await
    }

    pub async fn save_offline_changes(
        &self,
        session_id: &str,
        changes: Vec<SyncChange>,
    ) -> Result<SaveResult> {
        self.sessions.save_offline_changes(session_id, changes).await
    }

    pub async fn get_queued_changes(&self, session_id: &str) -> Result<Vec<QueuedChange>> {
        self.sessions.get_queued_changes(session_id).await
    }

    /// Move a session's queued changes into a pending upload batch
    ///
    /// The batch is returned unprocessed; queued entries are removed once
    /// the batch is persisted.
    pub async fn submit_queued_changes(&self, session_id: &str) -> Result<SyncBatch> {
        let session = self.sessions.live_session(session_id).await?;
        require_capability(&session, Capability::Sync)?;

        let queued = self.sessions.get_queued_changes(session_id).await?;
        let change_ids: Vec<String> = queued.iter().map(|q| q.change.id.clone()).collect();

        let batch = self
            .coordinator
            .create_batch(NewBatch {
                device_id: session.device_id.clone(),
                branch_id: session.branch_id.clone(),
                sync_type: SyncType::ChangesOnly,
                direction: SyncDirection::Upload,
                changes: queued.into_iter().map(|q| q.change).collect(),
                metadata: json!({ "sessionId": session.id }),
            })
            .await?;

        self.sessions
            .remove_queued_changes(session_id, &change_ids)
            .await?;
        self.sessions.update_activity(session_id).await?;

        tracing::info!(
            session_id = %session_id,
            batch_id = %batch.batch_id,
            changes = change_ids.len(),
            "Submitted queued offline changes"
        );

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::RecordingAuditSink;
    use crate::store::{MemoryEntityRepository, MemoryKvStore};
    use crate::sync::{BatchStatus, ChangeOperation, SyncError};

    fn service() -> SyncService {
        let registry = EntityKind::ALL
            .iter()
            .fold(EntityRegistry::new(), |registry, kind| {
                registry.with(Arc::new(MemoryEntityRepository::new(*kind)))
            });

        SyncService::new(
            Arc::new(registry),
            Arc::new(MemoryKvStore::new()),
            Arc::new(RecordingAuditSink::new()),
            SyncConfig::default(),
        )
    }

    fn session_request(capabilities: Vec<Capability>) -> NewSession {
        NewSession {
            device_id: "pos-7".to_string(),
            user_id: "cashier".to_string(),
            branch_id: Some("main".to_string()),
            capabilities,
        }
    }

    #[tokio::test]
    async fn test_offline_round_trip() {
        let service = service();
        let session = service.create_session(session_request(vec![])).await.unwrap();

        let changes = vec![
            SyncChange::new(EntityKind::Product, "p-1", ChangeOperation::Create, Some(json!({"name": "Tea"})), "cashier"),
            SyncChange::new(EntityKind::InventoryItem, "i-1", ChangeOperation::Create, Some(json!({"quantity": 4})), "cashier"),
        ];
        let saved = service.save_offline_changes(&session.id, changes).await.unwrap();
        assert_eq!(saved.saved_count, 2);

        // Feed is cached empty before the upload lands
        let before = service.build_feed(EntityKind::Product, None, None, None).await.unwrap();
        assert!(before.changes.is_empty());

        let batch = service.submit_queued_changes(&session.id).await.unwrap();
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.sync_type, SyncType::ChangesOnly);
        assert_eq!(batch.branch_id.as_deref(), Some("main"));
        assert!(service.get_queued_changes(&session.id).await.unwrap().is_empty());

        let result = service.process_batch(&batch.batch_id).await.unwrap();
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.processed_count, 2);

        // Completion invalidated the cached page
        let after = service.build_feed(EntityKind::Product, None, None, None).await.unwrap();
        assert_eq!(after.changes.len(), 1);
        assert_eq!(after.changes[0].operation, ChangeOperation::Create);

        let inventory = service
            .build_feed(EntityKind::InventoryItem, None, Some("main"), None)
            .await
            .unwrap();
        assert_eq!(inventory.changes.len(), 1);
        let other_branch = service
            .build_feed(EntityKind::InventoryItem, None, Some("north"), None)
            .await
            .unwrap();
        assert!(other_branch.changes.is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_sync_capability() {
        let service = service();
        let session = service
            .create_session(session_request(vec![Capability::Read, Capability::Write]))
            .await
            .unwrap();

        let result = service.submit_queued_changes(&session.id).await;
        assert!(matches!(
            result,
            Err(SyncError::CapabilityDenied { capability: Capability::Sync, .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_empty_queue_yields_empty_batch() {
        let service = service();
        let session = service.create_session(session_request(vec![])).await.unwrap();

        let batch = service.submit_queued_changes(&session.id).await.unwrap();
        assert!(batch.changes.is_empty());
        assert_eq!(batch.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_cleanup_uses_configured_retention() {
        let service = service();
        let batch = service
            .create_batch(NewBatch {
                device_id: "pos-7".to_string(),
                branch_id: None,
                sync_type: SyncType::Full,
                direction: SyncDirection::Upload,
                changes: vec![],
                metadata: json!({}),
            })
            .await
            .unwrap();
        service.process_batch(&batch.batch_id).await.unwrap();

        assert_eq!(service.cleanup_old_batches(None).await.unwrap(), 0);
        assert_eq!(service.cleanup_old_batches(Some(-1)).await.unwrap(), 1);
    }
}
