//! Offline session types

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{EntityKind, EntityRecord};
use crate::sync::{ChangeError, SyncChange};

/// Data package format written to `metadata.formatVersion`
pub const PACKAGE_FORMAT_VERSION: &str = "1.0";

// ============================================================================
// Sessions
// ============================================================================

/// What an offline session is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Download data packages
    Read,
    /// Queue offline changes
    Write,
    /// Submit queued changes for reconciliation
    Sync,
}

impl Capability {
    pub const ALL: [Capability; 3] = [Capability::Read, Capability::Write, Capability::Sync];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Sync => "sync",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Expired,
    Suspended,
}

/// Parameters for a new session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub device_id: String,
    pub user_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    /// Empty means every capability
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

/// Summary of the last data package built for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
    pub kinds: Vec<EntityKind>,
    pub record_count: usize,
}

/// A bounded-lifetime grant for a device to work disconnected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSession {
    pub id: String,
    pub device_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub status: SessionStatus,
    pub capabilities: Vec<Capability>,
    pub max_offline_hours: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_snapshot: Option<SnapshotSummary>,
}

impl OfflineSession {
    /// End of the session lifetime, saturating at the latest representable time
    pub fn expires_at(&self) -> DateTime<Utc> {
        Duration::try_hours(self.max_offline_hours)
            .and_then(|lifetime| self.started_at.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether the session lifetime has elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Remaining lifetime, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at() - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

// ============================================================================
// Data Packages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub format_version: String,
    /// Watermark for the device's first incremental feed request
    pub last_sync_time: DateTime<Utc>,
    /// Size of the serialized `entities`
    pub byte_size: usize,
    /// SHA-256 hex of the serialized `entities`
    pub checksum: String,
}

/// Point-in-time export used to seed a device's local store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineDataPackage {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub entities: BTreeMap<EntityKind, Vec<EntityRecord>>,
    pub metadata: PackageMetadata,
}

// ============================================================================
// Queued Changes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Queued,
}

/// An offline write waiting to be submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedChange {
    pub session_id: String,
    pub device_id: String,
    pub change: SyncChange,
    pub status: QueueStatus,
    pub queued_at: DateTime<Utc>,
}

/// Outcome of saving offline changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResult {
    pub saved_count: usize,
    /// Queued changes that would conflict with the current store state
    pub conflict_count: usize,
    pub errors: Vec<ChangeError>,
}
