//! Entity store seam
//!
//! Domain records (products, invoices, accounts, ...) are opaque JSON
//! documents to the sync core. Each entity kind is served by its own
//! [`EntityRepository`], looked up through the [`EntityRegistry`] by the
//! [`EntityKind`] enum instead of by string.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::StoreResult;

// ============================================================================
// Entity Kinds
// ============================================================================

/// Kinds of entities that can be synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Category,
    Customer,
    Supplier,
    InventoryItem,
    Invoice,
    Payment,
    Account,
}

impl EntityKind {
    /// Every known kind, in declaration order
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Product,
        EntityKind::Category,
        EntityKind::Customer,
        EntityKind::Supplier,
        EntityKind::InventoryItem,
        EntityKind::Invoice,
        EntityKind::Payment,
        EntityKind::Account,
    ];

    /// Kinds exported in an offline data package when none are requested
    pub const DEFAULT_PACKAGE: [EntityKind; 4] = [
        EntityKind::Product,
        EntityKind::Category,
        EntityKind::Customer,
        EntityKind::InventoryItem,
    ];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Category => "category",
            EntityKind::Customer => "customer",
            EntityKind::Supplier => "supplier",
            EntityKind::InventoryItem => "inventory_item",
            EntityKind::Invoice => "invoice",
            EntityKind::Payment => "payment",
            EntityKind::Account => "account",
        }
    }

    /// Fields whose disagreement between two updates is a data conflict
    pub fn significant_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Product => &["name", "sku", "price", "cost"],
            EntityKind::Category => &["name", "parentId"],
            EntityKind::Customer => &["name", "email", "phone", "creditLimit"],
            EntityKind::Supplier => &["name", "email", "phone"],
            EntityKind::InventoryItem => &["quantity", "reorderLevel"],
            EntityKind::Invoice => &["total", "status", "customerId"],
            EntityKind::Payment => &["amount", "method", "invoiceId"],
            EntityKind::Account => &["balance", "status"],
        }
    }

    /// Whether records of this kind belong to a single branch
    pub fn is_branch_scoped(&self) -> bool {
        matches!(
            self,
            EntityKind::InventoryItem | EntityKind::Invoice | EntityKind::Payment
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entity kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown entity kind: {0}")]
pub struct ParseEntityKindError(pub String);

impl FromStr for EntityKind {
    type Err = ParseEntityKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEntityKindError(s.to_string()))
    }
}

// ============================================================================
// Records
// ============================================================================

/// A stored domain record as seen by the sync core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Store-assigned revision counter
    pub version: u64,
    pub created_at: DateTime<Utc>,
    /// Modification marker used for conflict detection
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag; deleted records stay visible to the change feed
    #[serde(default)]
    pub deleted: bool,
}

impl EntityRecord {
    /// True if the record exists and is not a tombstone
    pub fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Data written by a create or update
#[derive(Debug, Clone)]
pub struct EntityWrite {
    pub data: Value,
    pub branch_id: Option<String>,
    /// Modification marker to store on the record
    pub modified_at: DateTime<Utc>,
}

/// Position in the `(updated_at, id)` order of one kind's records
///
/// Several records can share an `updated_at`, so a watermark alone cannot
/// say where a page stopped. `after_id` names the last record delivered at
/// that marker; `None` means every record at the marker was delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCursor {
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_id: Option<String>,
}

impl ChangeCursor {
    /// Cursor past every record modified at or before `watermark`
    pub fn at(watermark: DateTime<Utc>) -> Self {
        Self {
            updated_at: watermark,
            after_id: None,
        }
    }

    /// Cursor just past `record`
    pub fn after(record: &EntityRecord) -> Self {
        Self {
            updated_at: record.updated_at,
            after_id: Some(record.id.clone()),
        }
    }

    /// True if `record` sorts after this cursor
    pub fn admits(&self, record: &EntityRecord) -> bool {
        match record.updated_at.cmp(&self.updated_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Equal => self
                .after_id
                .as_deref()
                .map_or(false, |id| record.id.as_str() > id),
            std::cmp::Ordering::Less => false,
        }
    }
}

/// Scope filters for change listings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeFilter {
    /// Only return records of this branch (branch-scoped kinds only)
    pub branch_id: Option<String>,
    /// Include tombstones
    pub include_deleted: bool,
}

impl ScopeFilter {
    /// Filter for a branch, optionally including tombstones
    pub fn for_branch(branch_id: Option<&str>, include_deleted: bool) -> Self {
        Self {
            branch_id: branch_id.map(str::to_string),
            include_deleted,
        }
    }

    /// Check a record against this filter
    pub fn matches(&self, record: &EntityRecord) -> bool {
        if record.deleted && !self.include_deleted {
            return false;
        }
        match (&self.branch_id, record.kind.is_branch_scoped()) {
            (Some(branch), true) => record.branch_id.as_deref() == Some(branch.as_str()),
            _ => true,
        }
    }
}

// ============================================================================
// Repository Trait
// ============================================================================

/// Keyed CRUD access to the records of one entity kind
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Kind served by this repository
    fn kind(&self) -> EntityKind;

    /// Load a record, tombstones included
    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>>;

    /// Insert a record, replacing a tombstone with the same id
    async fn create(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord>;

    /// Replace the data of a live record
    async fn update(&self, id: &str, write: EntityWrite) -> StoreResult<EntityRecord>;

    /// Tombstone a live record
    async fn delete(&self, id: &str, deleted_at: DateTime<Utc>) -> StoreResult<()>;

    /// Records sorting after `cursor` in `(updated_at, id)` order, all
    /// records when there is no cursor
    async fn list_changed_since(
        &self,
        cursor: Option<&ChangeCursor>,
        scope: &ScopeFilter,
        limit: usize,
    ) -> StoreResult<Vec<EntityRecord>>;
}

// ============================================================================
// Registry
// ============================================================================

/// Maps entity kinds to their repositories
#[derive(Clone, Default)]
pub struct EntityRegistry {
    repositories: HashMap<EntityKind, Arc<dyn EntityRepository>>,
}

impl EntityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository under the kind it reports
    pub fn register(&mut self, repository: Arc<dyn EntityRepository>) -> &mut Self {
        self.repositories.insert(repository.kind(), repository);
        self
    }

    /// Builder-style registration
    pub fn with(mut self, repository: Arc<dyn EntityRepository>) -> Self {
        self.register(repository);
        self
    }

    /// Look up the repository for a kind
    pub fn get(&self, kind: EntityKind) -> Option<&Arc<dyn EntityRepository>> {
        self.repositories.get(&kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<_> = self.repositories.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: EntityKind, branch: Option<&str>, deleted: bool) -> EntityRecord {
        EntityRecord {
            id: "rec-1".to_string(),
            kind,
            data: serde_json::json!({}),
            branch_id: branch.map(str::to_string),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted,
        }
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("widget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&EntityKind::InventoryItem).unwrap();
        assert_eq!(json, "\"inventory_item\"");
    }

    #[test]
    fn test_scope_filters_branch_scoped_kinds_only() {
        let scope = ScopeFilter::for_branch(Some("branch-a"), false);

        assert!(scope.matches(&record(EntityKind::Invoice, Some("branch-a"), false)));
        assert!(!scope.matches(&record(EntityKind::Invoice, Some("branch-b"), false)));
        // Products are shared across branches
        assert!(scope.matches(&record(EntityKind::Product, Some("branch-b"), false)));
    }

    #[test]
    fn test_scope_hides_tombstones_unless_requested() {
        let tombstone = record(EntityKind::Product, None, true);
        assert!(!ScopeFilter::default().matches(&tombstone));
        assert!(ScopeFilter::for_branch(None, true).matches(&tombstone));
    }

    #[test]
    fn test_cursor_breaks_ties_by_id() {
        let mut b = record(EntityKind::Product, None, false);
        b.id = "b".to_string();
        let mut a = b.clone();
        a.id = "a".to_string();
        let mut c = b.clone();
        c.id = "c".to_string();

        // A bare watermark skips everything at the marker
        assert!(!ChangeCursor::at(b.updated_at).admits(&c));

        let cursor = ChangeCursor::after(&b);
        assert!(!cursor.admits(&a));
        assert!(!cursor.admits(&b));
        assert!(cursor.admits(&c));

        let mut later = a.clone();
        later.updated_at = b.updated_at + chrono::Duration::milliseconds(1);
        assert!(cursor.admits(&later));
    }
}
