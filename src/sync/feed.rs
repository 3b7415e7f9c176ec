//! Change feed for downloads
//!
//! Turns the records of one entity kind past an `(updated_at, id)` cursor
//! into an ordered list of [`SyncChange`]s a device can replay. Pages are memoized
//! in a bounded LRU cache that drops entries when the kind changes.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::{Result, SyncError};
use super::types::{ChangeOperation, SyncChange};
use crate::cache::CacheInvalidator;
use crate::store::{ChangeCursor, EntityKind, EntityRecord, EntityRegistry, ScopeFilter};

/// Actor recorded on changes produced by the server
pub const SERVER_ACTOR: &str = "server";

/// One page of downloadable changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFeed {
    pub kind: EntityKind,
    pub changes: Vec<SyncChange>,
    /// Watermark to request the next page with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_watermark: Option<DateTime<Utc>>,
    /// Last entity delivered at `next_watermark`, sent back with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_after_id: Option<String>,
    pub has_more: bool,
}

impl ChangeFeed {
    /// Cursor for the page after this one
    pub fn next_cursor(&self) -> Option<ChangeCursor> {
        self.next_watermark.map(|updated_at| ChangeCursor {
            updated_at,
            after_id: self.next_after_id.clone(),
        })
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct FeedKey {
    kind: EntityKind,
    since: Option<ChangeCursor>,
    branch_id: Option<String>,
    limit: usize,
}

struct CachedFeed {
    feed: ChangeFeed,
    cached_at: Instant,
}

/// Bounded LRU cache of feed pages
///
/// Entries also age out after `ttl`, which bounds staleness when the entity
/// store is written by something other than the sync core.
pub struct FeedCache {
    entries: Mutex<LruCache<FeedKey, CachedFeed>>,
    ttl: Duration,
}

impl FeedCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn get(&self, key: &FeedKey) -> Option<ChangeFeed> {
        let mut entries = self.entries.lock();
        let fresh = entries.get(key)?.cached_at.elapsed() < self.ttl;
        if fresh {
            entries.get(key).map(|cached| cached.feed.clone())
        } else {
            entries.pop(key);
            None
        }
    }

    fn put(&self, key: FeedKey, feed: ChangeFeed) {
        self.entries.lock().put(
            key,
            CachedFeed {
                feed,
                cached_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheInvalidator for FeedCache {
    async fn invalidate(&self, kinds: &[EntityKind]) {
        let mut entries = self.entries.lock();
        let stale: Vec<FeedKey> = entries
            .iter()
            .filter(|(key, _)| kinds.contains(&key.kind))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            entries.pop(key);
        }

        if !stale.is_empty() {
            tracing::debug!(kinds = ?kinds, dropped = stale.len(), "Invalidated feed cache");
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builds change feeds from the entity registry
#[derive(Clone)]
pub struct ChangeFeedBuilder {
    registry: Arc<EntityRegistry>,
    cache: Arc<FeedCache>,
    page_size: usize,
}

impl ChangeFeedBuilder {
    pub fn new(registry: Arc<EntityRegistry>, cache: Arc<FeedCache>, page_size: usize) -> Self {
        Self {
            registry,
            cache,
            page_size: page_size.max(1),
        }
    }

    /// Build the page of changes for `kind` after `since`
    ///
    /// `limit` is capped at the configured page size. Pages follow the
    /// `(updated_at, id)` order, and the next cursor names the last record
    /// emitted, so a run of records sharing one marker can span pages.
    pub async fn build_feed(
        &self,
        kind: EntityKind,
        since: Option<&ChangeCursor>,
        branch_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<ChangeFeed> {
        let limit = limit.unwrap_or(self.page_size).clamp(1, self.page_size);
        let key = FeedKey {
            kind,
            since: since.cloned(),
            branch_id: branch_id.map(str::to_string),
            limit,
        };

        if let Some(feed) = self.cache.get(&key) {
            tracing::debug!(kind = %kind, "Feed cache hit");
            return Ok(feed);
        }

        let repository = self
            .registry
            .get(kind)
            .ok_or(SyncError::UnregisteredKind(kind))?;

        // One extra record tells us whether another page exists
        let scope = ScopeFilter::for_branch(branch_id, true);
        let mut records = repository
            .list_changed_since(since, &scope, limit + 1)
            .await?;
        let has_more = records.len() > limit;
        records.truncate(limit);

        let watermark = since.map(|c| c.updated_at);
        let next = records.last().map(ChangeCursor::after).or_else(|| since.cloned());
        let changes: Vec<SyncChange> = records
            .iter()
            .map(|record| record_to_change(record, watermark))
            .collect();

        tracing::debug!(
            kind = %kind,
            changes = changes.len(),
            has_more,
            "Built change feed"
        );

        let feed = ChangeFeed {
            kind,
            changes,
            next_watermark: next.as_ref().map(|c| c.updated_at),
            next_after_id: next.and_then(|c| c.after_id),
            has_more,
        };
        self.cache.put(key, feed.clone());
        Ok(feed)
    }
}

fn record_to_change(record: &EntityRecord, watermark: Option<DateTime<Utc>>) -> SyncChange {
    let operation = if record.deleted {
        ChangeOperation::Delete
    } else if watermark.map_or(true, |w| record.created_at > w) {
        ChangeOperation::Create
    } else {
        ChangeOperation::Update
    };

    SyncChange {
        // Deterministic so a re-downloaded page carries the same ids
        id: format!("{}:{}:{}", record.kind, record.id, record.version),
        entity_kind: record.kind,
        entity_id: record.id.clone(),
        operation,
        payload: (!record.deleted).then(|| record.data.clone()),
        timestamp: record.updated_at,
        version: record.version,
        actor_id: SERVER_ACTOR.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEntityRepository;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn record(id: &str, kind: EntityKind, updated_at: DateTime<Utc>) -> EntityRecord {
        EntityRecord {
            id: id.to_string(),
            kind,
            data: json!({"name": id}),
            branch_id: None,
            version: 1,
            created_at: updated_at,
            updated_at,
            deleted: false,
        }
    }

    async fn builder_with(
        records: Vec<EntityRecord>,
        page_size: usize,
    ) -> (ChangeFeedBuilder, Arc<FeedCache>, Arc<MemoryEntityRepository>) {
        let repository = Arc::new(MemoryEntityRepository::new(EntityKind::Product));
        for r in records {
            repository.insert(r).await;
        }
        let registry = Arc::new(EntityRegistry::new().with(repository.clone()));
        let cache = Arc::new(FeedCache::new(16, Duration::from_secs(60)));
        (
            ChangeFeedBuilder::new(registry, cache.clone(), page_size),
            cache,
            repository,
        )
    }

    #[tokio::test]
    async fn test_feed_orders_and_classifies_operations() {
        let base = Utc::now() - ChronoDuration::hours(1);
        let watermark = base + ChronoDuration::minutes(10);

        let mut updated = record("b", EntityKind::Product, base + ChronoDuration::minutes(20));
        updated.created_at = base;
        let created = record("a", EntityKind::Product, base + ChronoDuration::minutes(30));
        let mut deleted = record("c", EntityKind::Product, base + ChronoDuration::minutes(40));
        deleted.deleted = true;
        let old = record("d", EntityKind::Product, base);

        let (builder, _, _) = builder_with(vec![updated, created, deleted, old], 100).await;
        let feed = builder
            .build_feed(EntityKind::Product, Some(&ChangeCursor::at(watermark)), None, None)
            .await
            .unwrap();

        let ops: Vec<(String, ChangeOperation)> = feed
            .changes
            .iter()
            .map(|c| (c.entity_id.clone(), c.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("b".to_string(), ChangeOperation::Update),
                ("a".to_string(), ChangeOperation::Create),
                ("c".to_string(), ChangeOperation::Delete),
            ]
        );
        assert!(feed.changes[2].payload.is_none());
        assert!(feed.changes.iter().all(|c| c.actor_id == SERVER_ACTOR));
        assert_eq!(feed.next_watermark, Some(base + ChronoDuration::minutes(40)));
        assert!(!feed.has_more);
    }

    #[tokio::test]
    async fn test_feed_pagination() {
        let base = Utc::now() - ChronoDuration::hours(1);
        let records = (0..5)
            .map(|i| record(&format!("p-{}", i), EntityKind::Product, base + ChronoDuration::minutes(i)))
            .collect();
        let (builder, _, _) = builder_with(records, 2).await;

        let first = builder
            .build_feed(EntityKind::Product, None, None, Some(10))
            .await
            .unwrap();
        assert_eq!(first.changes.len(), 2);
        assert!(first.has_more);

        let second = builder
            .build_feed(EntityKind::Product, first.next_cursor().as_ref(), None, None)
            .await
            .unwrap();
        assert_eq!(second.changes[0].entity_id, "p-2");
    }

    #[tokio::test]
    async fn test_pages_split_inside_equal_markers() {
        let at = Utc::now() - ChronoDuration::minutes(5);
        let records = ["a", "b", "c"]
            .iter()
            .map(|id| record(id, EntityKind::Product, at))
            .collect();
        let (builder, _, _) = builder_with(records, 2).await;

        let mut seen = Vec::new();
        let mut cursor: Option<ChangeCursor> = None;
        loop {
            let page = builder
                .build_feed(EntityKind::Product, cursor.as_ref(), None, None)
                .await
                .unwrap();
            seen.extend(page.changes.iter().map(|c| c.entity_id.clone()));
            cursor = page.next_cursor();
            if !page.has_more {
                break;
            }
        }
        assert_eq!(seen, vec!["a", "b", "c"]);

        // Caught up: the final cursor yields nothing new
        let tail = builder
            .build_feed(EntityKind::Product, cursor.as_ref(), None, None)
            .await
            .unwrap();
        assert!(tail.changes.is_empty());
        assert_eq!(tail.next_cursor(), cursor);
    }

    #[tokio::test]
    async fn test_cache_keeps_sub_millisecond_cursors_apart() {
        let at = Utc::now() - ChronoDuration::minutes(5);
        let later = at + ChronoDuration::microseconds(100);
        let (builder, cache, _) =
            builder_with(vec![record("p-1", EntityKind::Product, later)], 10).await;

        let before = builder
            .build_feed(EntityKind::Product, Some(&ChangeCursor::at(at)), None, None)
            .await
            .unwrap();
        assert_eq!(before.changes.len(), 1);

        let after = builder
            .build_feed(EntityKind::Product, Some(&ChangeCursor::at(later)), None, None)
            .await
            .unwrap();
        assert!(after.changes.is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_feed_cache_invalidation() {
        let base = Utc::now() - ChronoDuration::hours(1);
        let (builder, cache, repository) =
            builder_with(vec![record("p-1", EntityKind::Product, base)], 100).await;

        let first = builder.build_feed(EntityKind::Product, None, None, None).await.unwrap();
        assert_eq!(first.changes.len(), 1);
        assert_eq!(cache.len(), 1);

        repository.insert(record("p-2", EntityKind::Product, Utc::now())).await;

        // Still served from cache until the kind is invalidated
        let cached = builder.build_feed(EntityKind::Product, None, None, None).await.unwrap();
        assert_eq!(cached.changes.len(), 1);

        cache.invalidate(&[EntityKind::Customer]).await;
        assert_eq!(cache.len(), 1);

        cache.invalidate(&[EntityKind::Product]).await;
        assert!(cache.is_empty());

        let fresh = builder.build_feed(EntityKind::Product, None, None, None).await.unwrap();
        assert_eq!(fresh.changes.len(), 2);
    }

    #[tokio::test]
    async fn test_expired_cache_entries_are_rebuilt() {
        let cache = FeedCache::new(4, Duration::ZERO);
        let key = FeedKey {
            kind: EntityKind::Product,
            since: None,
            branch_id: None,
            limit: 10,
        };
        cache.put(
            key.clone(),
            ChangeFeed {
                kind: EntityKind::Product,
                changes: vec![],
                next_watermark: None,
                next_after_id: None,
                has_more: false,
            },
        );
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_kind() {
        let (builder, _, _) = builder_with(vec![], 10).await;
        let result = builder.build_feed(EntityKind::Invoice, None, None, None).await;
        assert!(matches!(result, Err(SyncError::UnregisteredKind(EntityKind::Invoice))));
    }
}
