//! Cache invalidation seam
//!
//! Read caches that depend on entity data are told which kinds changed once
//! a batch finishes or a conflict resolution writes to the store.

use async_trait::async_trait;

use crate::store::EntityKind;

/// Receiver of cache invalidation notices
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Drop cached data derived from the given kinds
    async fn invalidate(&self, kinds: &[EntityKind]);
}

/// Invalidator for deployments without read caches
#[derive(Debug, Clone, Default)]
pub struct NoopInvalidator;

#[async_trait]
impl CacheInvalidator for NoopInvalidator {
    async fn invalidate(&self, _kinds: &[EntityKind]) {}
}
