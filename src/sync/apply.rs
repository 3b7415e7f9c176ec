//! Entity mutation path
//!
//! Direct application of a batch change and application of a conflict
//! resolution both go through [`ChangeApplier::apply`].

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::error::{Result, SyncError};
use super::types::{ChangeOperation, SyncChange};
use crate::store::{EntityKind, EntityRecord, EntityRegistry, EntityRepository, EntityWrite};

/// What a change did to the entity store
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Created(EntityRecord),
    Updated(EntityRecord),
    Deleted,
    /// Delete of an entity that does not exist
    Skipped,
}

impl Applied {
    /// Audit action name for the performed write
    pub fn action(&self) -> &'static str {
        match self {
            Applied::Created(_) => "create",
            Applied::Updated(_) => "update",
            Applied::Deleted => "delete",
            Applied::Skipped => "skip",
        }
    }
}

/// Applies changes to the entity store through the typed registry
#[derive(Clone)]
pub struct ChangeApplier {
    registry: Arc<EntityRegistry>,
}

impl ChangeApplier {
    pub fn new(registry: Arc<EntityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    fn repository(&self, kind: EntityKind) -> Result<&Arc<dyn EntityRepository>> {
        self.registry
            .get(kind)
            .ok_or(SyncError::UnregisteredKind(kind))
    }

    /// Load the stored record a change targets, tombstones included
    pub async fn current(&self, change: &SyncChange) -> Result<Option<EntityRecord>> {
        let repository = self.repository(change.entity_kind)?;
        Ok(repository.get(&change.entity_id).await?)
    }

    /// Write a change to the store, stamping it with `modified_at`
    ///
    /// Creates against a live record and updates against a missing or
    /// deleted one are applied as upserts, so first writes and resurrections
    /// succeed regardless of the operation the device reported.
    pub async fn apply(
        &self,
        change: &SyncChange,
        branch_id: Option<&str>,
        modified_at: DateTime<Utc>,
    ) -> Result<Applied> {
        let repository = self.repository(change.entity_kind)?;
        let failure = |reason: String| SyncError::ApplyFailure {
            change_id: change.id.clone(),
            reason,
        };

        let existing = repository
            .get(&change.entity_id)
            .await
            .map_err(|e| failure(e.to_string()))?;
        let live = existing.as_ref().is_some_and(EntityRecord::is_live);

        match change.operation {
            ChangeOperation::Create | ChangeOperation::Update => {
                let data = change
                    .payload
                    .clone()
                    .ok_or_else(|| failure(format!("{} without payload", change.operation.as_str())))?;
                let write = EntityWrite {
                    data,
                    branch_id: branch_id.map(str::to_string),
                    modified_at,
                };

                if live {
                    repository
                        .update(&change.entity_id, write)
                        .await
                        .map(Applied::Updated)
                        .map_err(|e| failure(e.to_string()))
                } else {
                    repository
                        .create(&change.entity_id, write)
                        .await
                        .map(Applied::Created)
                        .map_err(|e| failure(e.to_string()))
                }
            }
            ChangeOperation::Delete => {
                if !live {
                    return Ok(Applied::Skipped);
                }
                repository
                    .delete(&change.entity_id, modified_at)
                    .await
                    .map_err(|e| failure(e.to_string()))?;
                Ok(Applied::Deleted)
            }
        }
    }
}
