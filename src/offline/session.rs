//! Offline Session Manager
//!
//! Manages offline sessions with:
//! - Session persistence in the key/value store, TTL bound to the session lifetime
//! - Lazy expiry on access, with an optional periodic sweep
//! - Per-session queued writes
//! - Data package export for seeding a device's local store

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::package::compute_checksum;
use super::types::{
    Capability, NewSession, OfflineDataPackage, OfflineSession, PackageMetadata, QueueStatus,
    QueuedChange, SaveResult, SessionStatus, SnapshotSummary, PACKAGE_FORMAT_VERSION,
};
use crate::config::SyncConfig;
use crate::store::kv::{get_json, set_json};
use crate::store::{EntityKind, EntityRegistry, KeyValueStore, ScopeFilter};
use crate::sync::{ChangeError, ConflictDetector, Result, SyncChange, SyncError};

const SESSION_KEY_PREFIX: &str = "offline:session:";
const DEVICE_KEY_PREFIX: &str = "offline:device:";
const QUEUE_KEY_PREFIX: &str = "offline:changes:";

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

fn device_key(device_id: &str) -> String {
    format!("{}{}", DEVICE_KEY_PREFIX, device_id)
}

fn queue_prefix(session_id: &str) -> String {
    format!("{}{}:", QUEUE_KEY_PREFIX, session_id)
}

fn queue_key(session_id: &str, change_id: &str) -> String {
    format!("{}{}", queue_prefix(session_id), change_id)
}

// ============================================================================
// Session Manager
// ============================================================================

/// Manages offline sessions, their queued writes and data packages
#[derive(Clone)]
pub struct OfflineSessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    kv: Arc<dyn KeyValueStore>,
    registry: Arc<EntityRegistry>,
    detector: ConflictDetector,
    config: SyncConfig,
}

impl OfflineSessionManager {
    pub fn new(kv: Arc<dyn KeyValueStore>, registry: Arc<EntityRegistry>, config: SyncConfig) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                kv,
                registry,
                detector: ConflictDetector::new(),
                config,
            }),
        }
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Create an active session for a device
    pub async fn create_session(&self, request: NewSession) -> Result<OfflineSession> {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();

        let mut capabilities = if request.capabilities.is_empty() {
            Capability::ALL.to_vec()
        } else {
            request.capabilities
        };
        capabilities.sort();
        capabilities.dedup();

        let session = OfflineSession {
            id: format!(
                "offline_{}_{}_{}",
                request.device_id,
                now.timestamp_millis(),
                &suffix[..8]
            ),
            device_id: request.device_id,
            user_id: request.user_id,
            branch_id: request.branch_id,
            started_at: now,
            last_activity: now,
            status: SessionStatus::Active,
            capabilities,
            max_offline_hours: self.inner.config.max_offline_hours,
            data_snapshot: None,
        };

        self.save_session(&session).await?;

        let lifetime_secs = (session.max_offline_hours.max(0) as u64).saturating_mul(3600);
        let index_ttl = Duration::from_secs(lifetime_secs)
            .saturating_add(self.inner.config.expired_retention());
        self.inner
            .kv
            .set_add(&device_key(&session.device_id), &session.id, Some(index_ttl))
            .await?;

        tracing::info!(
            session_id = %session.id,
            device_id = %session.device_id,
            user_id = %session.user_id,
            capabilities = ?session.capabilities,
            "Created offline session"
        );

        Ok(session)
    }

    /// Check that a session exists, is active and has not outlived its lifetime
    ///
    /// A session found past its lifetime is persisted as expired.
    pub async fn validate_session(&self, session_id: &str) -> Result<bool> {
        let Some(mut session) = self.load_session(session_id).await? else {
            return Ok(false);
        };

        if session.status != SessionStatus::Active {
            return Ok(false);
        }

        if session.is_expired_at(Utc::now()) {
            self.expire(&mut session).await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Refresh the activity timestamp, flipping the session to expired when due
    pub async fn update_activity(&self, session_id: &str) -> Result<OfflineSession> {
        let mut session = self.require_session(session_id).await?;

        if session.status != SessionStatus::Expired && session.is_expired_at(Utc::now()) {
            self.expire(&mut session).await?;
            return Ok(session);
        }

        session.last_activity = Utc::now();
        self.save_session(&session).await?;
        Ok(session)
    }

    /// Pause a session; a suspended session fails validation until resumed
    pub async fn suspend_session(&self, session_id: &str) -> Result<OfflineSession> {
        let mut session = self.live_session(session_id).await?;
        session.status = SessionStatus::Suspended;
        session.last_activity = Utc::now();
        self.save_session(&session).await?;

        tracing::info!(session_id = %session_id, "Suspended offline session");
        Ok(session)
    }

    pub async fn resume_session(&self, session_id: &str) -> Result<OfflineSession> {
        let mut session = self.require_session(session_id).await?;

        match session.status {
            SessionStatus::Suspended => {}
            SessionStatus::Expired => return Err(SyncError::SessionExpired(session.id)),
            SessionStatus::Active => {
                return Err(SyncError::InvalidState(format!(
                    "session {} is not suspended",
                    session.id
                )))
            }
        }

        if session.is_expired_at(Utc::now()) {
            self.expire(&mut session).await?;
            return Err(SyncError::SessionExpired(session.id));
        }

        session.status = SessionStatus::Active;
        session.last_activity = Utc::now();
        self.save_session(&session).await?;

        tracing::info!(session_id = %session_id, "Resumed offline session");
        Ok(session)
    }

    /// Remove a session and its device index entry; ending an absent session is a no-op
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let Some(session) = self.load_session(session_id).await? else {
            tracing::debug!(session_id = %session_id, "End of unknown session ignored");
            return Ok(());
        };

        self.inner.kv.delete(&session_key(session_id)).await?;
        self.inner
            .kv
            .set_remove(&device_key(&session.device_id), session_id)
            .await?;

        tracing::info!(
            session_id = %session_id,
            device_id = %session.device_id,
            "Ended offline session"
        );
        Ok(())
    }

    /// Load a session without lifecycle checks
    pub async fn get_session(&self, session_id: &str) -> Result<OfflineSession> {
        self.require_session(session_id).await
    }

    /// All stored sessions of a device
    pub async fn get_device_sessions(&self, device_id: &str) -> Result<Vec<OfflineSession>> {
        let key = device_key(device_id);
        let mut sessions = Vec::new();

        for session_id in self.inner.kv.set_members(&key).await? {
            match self.load_session(&session_id).await? {
                Some(session) => sessions.push(session),
                // Evicted by TTL; drop the dangling index entry
                None => self.inner.kv.set_remove(&key, &session_id).await?,
            }
        }

        sessions.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(sessions)
    }

    // ========================================================================
    // Data Packages
    // ========================================================================

    /// Export the requested kinds (or the default set) for the session's scope
    pub async fn create_data_package(
        &self,
        session_id: &str,
        kinds: Option<Vec<EntityKind>>,
    ) -> Result<OfflineDataPackage> {
        let mut session = self.live_session(session_id).await?;
        require_capability(&session, Capability::Read)?;

        let kinds = match kinds {
            Some(kinds) if !kinds.is_empty() => kinds,
            _ => EntityKind::DEFAULT_PACKAGE.to_vec(),
        };

        let scope = ScopeFilter::for_branch(session.branch_id.as_deref(), false);
        let mut entities = BTreeMap::new();
        for kind in kinds {
            let repository = self
                .inner
                .registry
                .get(kind)
                .ok_or(SyncError::UnregisteredKind(kind))?;
            let records = repository
                .list_changed_since(None, &scope, self.inner.config.package_export_limit)
                .await?;
            entities.insert(kind, records);
        }

        let (byte_size, checksum) = compute_checksum(&entities)?;
        let now = Utc::now();

        session.data_snapshot = Some(SnapshotSummary {
            timestamp: now,
            checksum: checksum.clone(),
            kinds: entities.keys().copied().collect(),
            record_count: entities.values().map(Vec::len).sum(),
        });
        session.last_activity = now;
        self.save_session(&session).await?;

        tracing::info!(
            session_id = %session_id,
            kinds = entities.len(),
            byte_size,
            "Built offline data package"
        );

        Ok(OfflineDataPackage {
            session_id: session.id,
            timestamp: now,
            entities,
            metadata: PackageMetadata {
                format_version: PACKAGE_FORMAT_VERSION.to_string(),
                last_sync_time: now,
                byte_size,
                checksum,
            },
        })
    }

    // ========================================================================
    // Queued Changes
    // ========================================================================

    /// Queue changes made while offline
    ///
    /// Nothing is applied here. Without the `write` capability every change
    /// is reported as denied. `conflict_count` previews how many queued
    /// changes would conflict with the store as it is now.
    pub async fn save_offline_changes(
        &self,
        session_id: &str,
        changes: Vec<SyncChange>,
    ) -> Result<SaveResult> {
        let mut session = self.live_session(session_id).await?;
        let mut result = SaveResult::default();

        if let Err(denied) = require_capability(&session, Capability::Write) {
            let message = denied.to_string();
            result.errors = changes
                .iter()
                .map(|change| ChangeError::new(change, message.clone()))
                .collect();
            tracing::warn!(
                session_id = %session_id,
                rejected = changes.len(),
                "Offline changes rejected without write capability"
            );
        } else {
            let ttl = self.inner.config.queue_ttl();

            for change in changes {
                let Some(repository) = self.inner.registry.get(change.entity_kind) else {
                    let error = SyncError::UnregisteredKind(change.entity_kind);
                    result.errors.push(ChangeError::new(&change, error.to_string()));
                    continue;
                };

                match repository.get(&change.entity_id).await {
                    Ok(current) => {
                        if self.inner.detector.detect(&change, current.as_ref()).is_some() {
                            result.conflict_count += 1;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(change_id = %change.id, error = %e, "Conflict preview skipped");
                    }
                }

                let key = queue_key(&session.id, &change.id);
                let queued = QueuedChange {
                    session_id: session.id.clone(),
                    device_id: session.device_id.clone(),
                    change,
                    status: QueueStatus::Queued,
                    queued_at: Utc::now(),
                };

                match set_json(self.inner.kv.as_ref(), &key, &queued, Some(ttl)).await {
                    Ok(()) => result.saved_count += 1,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to queue offline change");
                        result.errors.push(ChangeError::new(&queued.change, e.to_string()));
                    }
                }
            }
        }

        session.last_activity = Utc::now();
        self.save_session(&session).await?;

        tracing::info!(
            session_id = %session_id,
            saved = result.saved_count,
            conflicts = result.conflict_count,
            errors = result.errors.len(),
            "Saved offline changes"
        );

        Ok(result)
    }

    /// Queued changes of a session, oldest change first
    pub async fn get_queued_changes(&self, session_id: &str) -> Result<Vec<QueuedChange>> {
        let keys = self
            .inner
            .kv
            .list_keys_by_prefix(&queue_prefix(session_id))
            .await?;

        let mut queued = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(entry) = get_json::<QueuedChange>(self.inner.kv.as_ref(), &key).await? {
                queued.push(entry);
            }
        }

        queued.sort_by(|a, b| {
            a.change
                .timestamp
                .cmp(&b.change.timestamp)
                .then_with(|| a.queued_at.cmp(&b.queued_at))
        });
        Ok(queued)
    }

    /// Drop queued entries once they have been handed to a batch
    pub async fn remove_queued_changes(&self, session_id: &str, change_ids: &[String]) -> Result<()> {
        for change_id in change_ids {
            self.inner.kv.delete(&queue_key(session_id, change_id)).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Sweep
    // ========================================================================

    /// Mark every session past its lifetime as expired
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut expired = 0;

        for key in self.inner.kv.list_keys_by_prefix(SESSION_KEY_PREFIX).await? {
            let Some(mut session) = get_json::<OfflineSession>(self.inner.kv.as_ref(), &key).await?
            else {
                continue;
            };
            if session.status != SessionStatus::Expired && session.is_expired_at(now) {
                self.expire(&mut session).await?;
                expired += 1;
            }
        }

        if expired > 0 {
            tracing::info!(expired, "Swept expired offline sessions");
        }
        Ok(expired)
    }

    /// Start background expiry sweep
    pub fn start_sweep_task(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_expired().await {
                    tracing::error!(error = %e, "Offline session sweep failed");
                }
            }
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load_session(&self, session_id: &str) -> Result<Option<OfflineSession>> {
        Ok(get_json(self.inner.kv.as_ref(), &session_key(session_id)).await?)
    }

    async fn require_session(&self, session_id: &str) -> Result<OfflineSession> {
        self.load_session(session_id)
            .await?
            .ok_or_else(|| SyncError::SessionNotFound(session_id.to_string()))
    }

    /// Load a session that must be active and within its lifetime
    pub(crate) async fn live_session(&self, session_id: &str) -> Result<OfflineSession> {
        let mut session = self.require_session(session_id).await?;

        match session.status {
            SessionStatus::Expired => return Err(SyncError::SessionExpired(session.id)),
            SessionStatus::Suspended => {
                return Err(SyncError::InvalidState(format!(
                    "session {} is suspended",
                    session.id
                )))
            }
            SessionStatus::Active => {}
        }

        if session.is_expired_at(Utc::now()) {
            self.expire(&mut session).await?;
            return Err(SyncError::SessionExpired(session.id));
        }

        Ok(session)
    }

    async fn expire(&self, session: &mut OfflineSession) -> Result<()> {
        session.status = SessionStatus::Expired;
        self.save_session(session).await?;

        tracing::info!(
            session_id = %session.id,
            device_id = %session.device_id,
            "Offline session expired"
        );
        Ok(())
    }

    /// Persist a session; live sessions live as long as their remaining
    /// lifetime, expired ones for the retention window
    async fn save_session(&self, session: &OfflineSession) -> Result<()> {
        let remaining = session.remaining(Utc::now());
        let ttl = if session.status == SessionStatus::Expired || remaining.is_zero() {
            self.inner.config.expired_retention()
        } else {
            remaining
        };

        set_json(self.inner.kv.as_ref(), &session_key(&session.id), session, Some(ttl)).await?;
        Ok(())
    }
}

/// Fail with `CapabilityDenied` unless the session holds `capability`
pub(crate) fn require_capability(session: &OfflineSession, capability: Capability) -> Result<()> {
    if session.has_capability(capability) {
        Ok(())
    } else {
        Err(SyncError::CapabilityDenied {
            session_id: session.id.clone(),
            capability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityRecord, EntityRepository, MemoryEntityRepository, MemoryKvStore};
    use crate::sync::ChangeOperation;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    struct Fixture {
        manager: OfflineSessionManager,
        kv: Arc<MemoryKvStore>,
        products: Arc<MemoryEntityRepository>,
        inventory: Arc<MemoryEntityRepository>,
    }

    fn fixture() -> Fixture {
        let kv = Arc::new(MemoryKvStore::new());
        let products = Arc::new(MemoryEntityRepository::new(EntityKind::Product));
        let inventory = Arc::new(MemoryEntityRepository::new(EntityKind::InventoryItem));
        let registry = EntityRegistry::new()
            .with(products.clone())
            .with(inventory.clone())
            .with(Arc::new(MemoryEntityRepository::new(EntityKind::Category)))
            .with(Arc::new(MemoryEntityRepository::new(EntityKind::Customer)));

        Fixture {
            manager: OfflineSessionManager::new(kv.clone(), Arc::new(registry), SyncConfig::default()),
            kv,
            products,
            inventory,
        }
    }

    fn new_session(capabilities: Vec<Capability>) -> NewSession {
        NewSession {
            device_id: "pos-1".to_string(),
            user_id: "user-1".to_string(),
            branch_id: Some("main".to_string()),
            capabilities,
        }
    }

    fn record(id: &str, kind: EntityKind, branch: Option<&str>) -> EntityRecord {
        let now = Utc::now();
        EntityRecord {
            id: id.to_string(),
            kind,
            data: json!({"name": id, "price": 3}),
            branch_id: branch.map(str::to_string),
            version: 1,
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }

    /// Rewind a stored session's start time
    async fn age_session(f: &Fixture, session_id: &str, hours: i64) {
        let key = session_key(session_id);
        let mut session: OfflineSession = get_json(f.kv.as_ref(), &key).await.unwrap().unwrap();
        session.started_at = Utc::now() - ChronoDuration::hours(hours);
        set_json(f.kv.as_ref(), &key, &session, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_session_defaults() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();

        assert!(session.id.starts_with("offline_pos-1_"));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.capabilities, Capability::ALL.to_vec());
        assert!(f.manager.validate_session(&session.id).await.unwrap());

        let device = f.manager.get_device_sessions("pos-1").await.unwrap();
        assert_eq!(device.len(), 1);
        assert_eq!(device[0].id, session.id);
    }

    #[tokio::test]
    async fn test_validate_persists_lazy_expiry() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();
        age_session(&f, &session.id, 25).await;

        assert!(!f.manager.validate_session(&session.id).await.unwrap());

        let stored = f.manager.get_session(&session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_validate_missing_session_is_false() {
        let f = fixture();
        assert!(!f.manager.validate_session("offline_nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_update_activity() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();

        let touched = f.manager.update_activity(&session.id).await.unwrap();
        assert!(touched.last_activity >= session.last_activity);
        assert_eq!(touched.status, SessionStatus::Active);

        age_session(&f, &session.id, 30).await;
        let expired = f.manager.update_activity(&session.id).await.unwrap();
        assert_eq!(expired.status, SessionStatus::Expired);

        let missing = f.manager.update_activity("offline_nope").await;
        assert!(matches!(missing, Err(SyncError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_data_package_scope_and_checksum() {
        let f = fixture();
        f.products.insert(record("p-1", EntityKind::Product, None)).await;
        let mut gone = record("p-2", EntityKind::Product, None);
        gone.deleted = true;
        f.products.insert(gone).await;
        f.inventory
            .insert(record("i-main", EntityKind::InventoryItem, Some("main")))
            .await;
        f.inventory
            .insert(record("i-north", EntityKind::InventoryItem, Some("north")))
            .await;

        let session = f.manager.create_session(new_session(vec![])).await.unwrap();
        let package = f.manager.create_data_package(&session.id, None).await.unwrap();

        assert_eq!(package.entities.len(), EntityKind::DEFAULT_PACKAGE.len());
        assert_eq!(package.entities[&EntityKind::Product].len(), 1);
        let inventory = &package.entities[&EntityKind::InventoryItem];
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory[0].id, "i-main");

        assert_eq!(package.metadata.format_version, PACKAGE_FORMAT_VERSION);
        assert!(package.verify().unwrap());

        let stored = f.manager.get_session(&session.id).await.unwrap();
        let snapshot = stored.data_snapshot.unwrap();
        assert_eq!(snapshot.checksum, package.metadata.checksum);
        assert_eq!(snapshot.record_count, 2);
    }

    #[tokio::test]
    async fn test_data_package_requires_read() {
        let f = fixture();
        let session = f
            .manager
            .create_session(new_session(vec![Capability::Write]))
            .await
            .unwrap();

        let result = f.manager.create_data_package(&session.id, None).await;
        assert!(matches!(
            result,
            Err(SyncError::CapabilityDenied { capability: Capability::Read, .. })
        ));
    }

    #[tokio::test]
    async fn test_read_only_session_cannot_queue() {
        let f = fixture();
        let session = f
            .manager
            .create_session(new_session(vec![Capability::Read]))
            .await
            .unwrap();

        let changes = vec![
            SyncChange::new(EntityKind::Product, "p-1", ChangeOperation::Create, Some(json!({})), "user-1"),
            SyncChange::new(EntityKind::Product, "p-2", ChangeOperation::Create, Some(json!({})), "user-1"),
        ];
        let result = f.manager.save_offline_changes(&session.id, changes).await.unwrap();

        assert_eq!(result.saved_count, 0);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors.iter().all(|e| e.message.contains("write")));
        assert!(f.manager.get_queued_changes(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_queues_without_applying() {
        let f = fixture();
        let mut stored = record("p-1", EntityKind::Product, None);
        stored.updated_at = Utc::now();
        f.products.insert(stored).await;

        let session = f.manager.create_session(new_session(vec![])).await.unwrap();
        let changes = vec![
            // Older than the stored record
            SyncChange::new(EntityKind::Product, "p-1", ChangeOperation::Update, Some(json!({"price": 4})), "user-1")
                .at(Utc::now() - ChronoDuration::hours(2)),
            SyncChange::new(EntityKind::Product, "p-9", ChangeOperation::Create, Some(json!({"name": "x"})), "user-1"),
            SyncChange::new(EntityKind::Supplier, "s-1", ChangeOperation::Create, Some(json!({})), "user-1"),
        ];
        let result = f.manager.save_offline_changes(&session.id, changes).await.unwrap();

        assert_eq!(result.saved_count, 2);
        assert_eq!(result.conflict_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].entity_id, "s-1");

        let queued = f.manager.get_queued_changes(&session.id).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].change.entity_id, "p-1");
        assert!(queued.iter().all(|q| q.status == QueueStatus::Queued));

        // Nothing reached the store
        assert!(f.products.get("p-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_on_expired_session_fails() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();
        age_session(&f, &session.id, 48).await;

        let result = f.manager.save_offline_changes(&session.id, vec![]).await;
        assert!(matches!(result, Err(SyncError::SessionExpired(_))));
    }

    #[tokio::test]
    async fn test_end_session_is_idempotent() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();

        f.manager.end_session(&session.id).await.unwrap();
        f.manager.end_session(&session.id).await.unwrap();

        assert!(!f.manager.validate_session(&session.id).await.unwrap());
        assert!(f.manager.get_device_sessions("pos-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_suspend_and_resume() {
        let f = fixture();
        let session = f.manager.create_session(new_session(vec![])).await.unwrap();

        f.manager.suspend_session(&session.id).await.unwrap();
        assert!(!f.manager.validate_session(&session.id).await.unwrap());

        let result = f.manager.create_data_package(&session.id, None).await;
        assert!(matches!(result, Err(SyncError::InvalidState(_))));

        f.manager.resume_session(&session.id).await.unwrap();
        assert!(f.manager.validate_session(&session.id).await.unwrap());

        let again = f.manager.resume_session(&session.id).await;
        assert!(matches!(again, Err(SyncError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let f = fixture();
        let old = f.manager.create_session(new_session(vec![])).await.unwrap();
        let fresh = f.manager.create_session(new_session(vec![])).await.unwrap();
        age_session(&f, &old.id, 25).await;

        assert_eq!(f.manager.sweep_expired().await.unwrap(), 1);
        assert_eq!(
            f.manager.get_session(&old.id).await.unwrap().status,
            SessionStatus::Expired
        );
        assert!(f.manager.validate_session(&fresh.id).await.unwrap());
        assert_eq!(f.manager.sweep_expired().await.unwrap(), 0);
    }
}
