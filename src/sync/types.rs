//! Sync data types
//!
//! Defines types for batch reconciliation including:
//! - Changes reported by devices or produced for download
//! - Sync batches and their lifecycle status
//! - Conflicts and their resolutions

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::store::{EntityKind, EntityRecord};

// ============================================================================
// Changes
// ============================================================================

/// Types of sync operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Create,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeOperation::Create => "create",
            ChangeOperation::Update => "update",
            ChangeOperation::Delete => "delete",
        }
    }
}

/// One mutation of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChange {
    /// Unique change ID
    pub id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub operation: ChangeOperation,
    /// Record data; absent for deletes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// When the change was made (device clock for uploads)
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
    /// User or device that made the change
    pub actor_id: String,
}

impl SyncChange {
    /// Create a change stamped with the current time
    pub fn new(
        entity_kind: EntityKind,
        entity_id: &str,
        operation: ChangeOperation,
        payload: Option<Value>,
        actor_id: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_kind,
            entity_id: entity_id.to_string(),
            operation,
            payload,
            timestamp: Utc::now(),
            version: 1,
            actor_id: actor_id.to_string(),
        }
    }

    /// Override the change timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ============================================================================
// Batches
// ============================================================================

/// How much data a sync covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Full,
    Incremental,
    ChangesOnly,
}

/// Which way changes travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Upload,
    Download,
    Bidirectional,
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Conflicted,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Conflicted => "conflicted",
        }
    }

    /// Whether processing has finished
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Conflicted
        )
    }

    /// Whether cleanup may purge a batch in this status
    pub fn is_purgeable(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for a new batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatch {
    pub device_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    #[serde(default)]
    pub changes: Vec<SyncChange>,
    #[serde(default)]
    pub metadata: Value,
}

/// A set of changes travelling in one direction for one device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    /// Internal ID
    pub id: String,
    /// Public batch identifier used by devices and storage keys
    pub batch_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub sync_type: SyncType,
    pub direction: SyncDirection,
    pub status: BatchStatus,
    pub changes: Vec<SyncChange>,
    #[serde(default)]
    pub conflicts: Vec<SyncConflict>,
    #[serde(default)]
    pub metadata: Value,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Batch-level failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-change failures of the last run
    #[serde(default)]
    pub errors: Vec<ChangeError>,
    /// Changes already written to the entity store
    #[serde(default)]
    pub applied_change_ids: Vec<String>,
}

impl SyncBatch {
    /// Create a pending batch
    pub fn new(request: NewBatch, max_retries: u32) -> Self {
        let now = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();

        Self {
            id: Uuid::new_v4().to_string(),
            batch_id: format!(
                "batch_{}_{}_{}",
                request.device_id,
                now.timestamp_millis(),
                &suffix[..8]
            ),
            device_id: request.device_id,
            branch_id: request.branch_id,
            sync_type: request.sync_type,
            direction: request.direction,
            status: BatchStatus::Pending,
            changes: request.changes,
            conflicts: Vec::new(),
            metadata: request.metadata,
            retry_count: 0,
            max_retries,
            created_at: now,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error: None,
            errors: Vec::new(),
            applied_change_ids: Vec::new(),
        }
    }

    /// Find a conflict by ID
    pub fn conflict(&self, conflict_id: &str) -> Option<&SyncConflict> {
        self.conflicts.iter().find(|c| c.id == conflict_id)
    }

    /// Find a change by ID
    pub fn change(&self, change_id: &str) -> Option<&SyncChange> {
        self.changes.iter().find(|c| c.id == change_id)
    }

    /// Number of conflicts still awaiting resolution
    pub fn unresolved_conflicts(&self) -> usize {
        self.conflicts.iter().filter(|c| !c.is_resolved()).count()
    }
}

// ============================================================================
// Conflicts
// ============================================================================

/// Why a change could not be applied as-is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictType {
    /// The store holds a newer version than the change knows about
    Version,
    /// Significant fields disagree between store and change
    Data,
    /// The change updates an entity that has been deleted
    Deleted,
}

/// How to resolve a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Keep the store's current state
    Local,
    /// Apply the incoming change as-is
    Remote,
    /// Apply a merged payload supplied by the caller
    Merge,
    /// Apply a hand-edited payload supplied by the caller
    Manual,
}

impl ConflictResolution {
    /// Whether this resolution needs a caller-supplied payload
    pub fn requires_payload(&self) -> bool {
        matches!(self, ConflictResolution::Merge | ConflictResolution::Manual)
    }
}

/// A detected disagreement between an incoming change and the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: String,
    /// Change that triggered the conflict
    pub change_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    /// Version held by the store
    pub local_version: u64,
    /// Version carried by the incoming change
    pub remote_version: u64,
    pub conflict_type: ConflictType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicting_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

impl SyncConflict {
    /// Create an unresolved conflict between a change and the stored record
    pub fn new(
        change: &SyncChange,
        current: &EntityRecord,
        conflict_type: ConflictType,
        conflicting_fields: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            change_id: change.id.clone(),
            entity_kind: change.entity_kind,
            entity_id: change.entity_id.clone(),
            local_version: current.version,
            remote_version: change.version,
            conflict_type,
            local_payload: (!current.deleted).then(|| current.data.clone()),
            remote_payload: change.payload.clone(),
            conflicting_fields,
            resolution: None,
            resolved_payload: None,
            resolved_at: None,
            detected_at: Utc::now(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}

// ============================================================================
// Results
// ============================================================================

/// A change that failed to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeError {
    pub change_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub message: String,
}

impl ChangeError {
    pub fn new(change: &SyncChange, message: impl Into<String>) -> Self {
        Self {
            change_id: change.id.clone(),
            entity_kind: change.entity_kind,
            entity_id: change.entity_id.clone(),
            message: message.into(),
        }
    }
}

/// Outcome of processing a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub batch_id: String,
    pub status: BatchStatus,
    pub processed_count: usize,
    pub failed_count: usize,
    pub conflicted_count: usize,
    pub conflicts: Vec<SyncConflict>,
    pub errors: Vec<ChangeError>,
    pub duration_ms: u64,
}

/// Acknowledgement of a conflict resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionAck {
    pub batch_id: String,
    pub conflict_id: String,
    pub resolution: ConflictResolution,
    /// Whether the entity store was written
    pub applied: bool,
    pub remaining_conflicts: usize,
}

/// Aggregate batch counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub total_batches: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflicted: usize,
    pub total_changes: usize,
    pub unresolved_conflicts: usize,
}

impl BatchStats {
    /// Fold one batch into the counts
    pub fn add(&mut self, batch: &SyncBatch) {
        self.total_batches += 1;
        match batch.status {
            BatchStatus::Pending => self.pending += 1,
            BatchStatus::Processing => self.processing += 1,
            BatchStatus::Completed => self.completed += 1,
            BatchStatus::Failed => self.failed += 1,
            BatchStatus::Conflicted => self.conflicted += 1,
        }
        self.total_changes += batch.changes.len();
        self.unresolved_conflicts += batch.unresolved_conflicts();
    }
}
