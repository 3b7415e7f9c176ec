//! Sync batch persistence
//!
//! Batches live in the key/value store as JSON under `sync:batch:{batch_id}`.

use std::sync::Arc;

use super::error::{Result, SyncError};
use super::types::SyncBatch;
use crate::store::kv::{get_json, set_json};
use crate::store::KeyValueStore;

/// Key prefix for persisted batches
pub const BATCH_KEY_PREFIX: &str = "sync:batch:";

fn batch_key(batch_id: &str) -> String {
    format!("{}{}", BATCH_KEY_PREFIX, batch_id)
}

/// Repository for sync batch persistence
#[derive(Clone)]
pub struct BatchStore {
    kv: Arc<dyn KeyValueStore>,
}

impl BatchStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load a batch, failing with `BatchNotFound` if absent
    pub async fn get(&self, batch_id: &str) -> Result<SyncBatch> {
        get_json::<SyncBatch>(self.kv.as_ref(), &batch_key(batch_id))
            .await?
            .ok_or_else(|| SyncError::BatchNotFound(batch_id.to_string()))
    }

    /// Persist a batch; batches carry no TTL and are purged by cleanup
    pub async fn save(&self, batch: &SyncBatch) -> Result<()> {
        set_json(self.kv.as_ref(), &batch_key(&batch.batch_id), batch, None).await?;
        Ok(())
    }

    pub async fn delete(&self, batch_id: &str) -> Result<()> {
        self.kv.delete(&batch_key(batch_id)).await?;
        Ok(())
    }

    /// Load every stored batch, skipping entries that fail to decode
    pub async fn list(&self) -> Result<Vec<SyncBatch>> {
        let keys = self.kv.list_keys_by_prefix(BATCH_KEY_PREFIX).await?;
        let mut batches = Vec::with_capacity(keys.len());

        for key in keys {
            match get_json::<SyncBatch>(self.kv.as_ref(), &key).await {
                Ok(Some(batch)) => batches.push(batch),
                // Expired or deleted between listing and loading
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping unreadable batch");
                }
            }
        }

        Ok(batches)
    }
}
