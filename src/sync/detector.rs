//! Conflict detection
//!
//! Optimistic, timestamp-based concurrency: an incoming change conflicts when
//! the store holds a modification the change does not know about, or when an
//! update disagrees with the store on a significant field. Clock skew between
//! devices can produce false positives or misses; no compensation is made.

use super::types::{ChangeOperation, ConflictType, SyncChange, SyncConflict};
use crate::store::EntityRecord;

/// Stateless conflict detector
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictDetector;

impl ConflictDetector {
    pub fn new() -> Self {
        Self
    }

    /// Detect whether `change` conflicts with the stored `current` record
    pub fn detect(&self, change: &SyncChange, current: Option<&EntityRecord>) -> Option<SyncConflict> {
        // First write (or no record at all) always applies
        let current = current?;

        if current.updated_at > change.timestamp {
            return Some(SyncConflict::new(change, current, ConflictType::Version, Vec::new()));
        }

        if current.deleted {
            // Creates resurrect and deletes are idempotent; only updates collide
            return (change.operation == ChangeOperation::Update)
                .then(|| SyncConflict::new(change, current, ConflictType::Deleted, Vec::new()));
        }

        if change.operation == ChangeOperation::Update {
            let fields = differing_fields(change, current);
            if !fields.is_empty() {
                return Some(SyncConflict::new(change, current, ConflictType::Data, fields));
            }
        }

        None
    }
}

/// Significant fields carried by the change whose value differs from the store
fn differing_fields(change: &SyncChange, current: &EntityRecord) -> Vec<String> {
    let Some(payload) = change.payload.as_ref() else {
        return Vec::new();
    };

    change
        .entity_kind
        .significant_fields()
        .iter()
        .filter(|field| match payload.get(**field) {
            Some(incoming) => current.data.get(**field) != Some(incoming),
            None => false,
        })
        .map(|field| field.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntityKind;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{json, Value};

    fn stored(data: Value, updated_at: DateTime<Utc>, deleted: bool) -> EntityRecord {
        EntityRecord {
            id: "p-1".to_string(),
            kind: EntityKind::Product,
            data,
            branch_id: None,
            version: 4,
            created_at: updated_at - Duration::days(1),
            updated_at,
            deleted,
        }
    }

    fn change(op: ChangeOperation, payload: Option<Value>, at: DateTime<Utc>) -> SyncChange {
        SyncChange::new(EntityKind::Product, "p-1", op, payload, "device-1").at(at)
    }

    #[test]
    fn test_no_current_entity_never_conflicts() {
        let detector = ConflictDetector::new();
        for op in [ChangeOperation::Create, ChangeOperation::Update, ChangeOperation::Delete] {
            assert!(detector.detect(&change(op, Some(json!({})), Utc::now()), None).is_none());
        }
    }

    #[test]
    fn test_newer_store_version_is_version_conflict() {
        let detector = ConflictDetector::new();
        let now = Utc::now();
        let current = stored(json!({"name": "Tea"}), now, false);

        for op in [ChangeOperation::Create, ChangeOperation::Update, ChangeOperation::Delete] {
            let incoming = change(op, Some(json!({"name": "Tea"})), now - Duration::seconds(1));
            let conflict = detector.detect(&incoming, Some(&current)).unwrap();
            assert_eq!(conflict.conflict_type, ConflictType::Version);
            assert_eq!(conflict.local_version, 4);
            assert_eq!(conflict.change_id, incoming.id);
        }
    }

    #[test]
    fn test_newer_tombstone_is_still_version_conflict() {
        let detector = ConflictDetector::new();
        let now = Utc::now();
        let tombstone = stored(json!({}), now, true);

        let incoming = change(ChangeOperation::Update, Some(json!({})), now - Duration::seconds(5));
        let conflict = detector.detect(&incoming, Some(&tombstone)).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::Version);
        assert!(conflict.local_payload.is_none());
    }

    #[test]
    fn test_update_with_differing_significant_field_is_data_conflict() {
        let detector = ConflictDetector::new();
        let then = Utc::now() - Duration::minutes(5);
        let current = stored(json!({"name": "Tea", "price": 3, "notes": "a"}), then, false);

        let incoming = change(
            ChangeOperation::Update,
            Some(json!({"name": "Tea", "price": 4, "notes": "b"})),
            Utc::now(),
        );
        let conflict = detector.detect(&incoming, Some(&current)).unwrap();

        assert_eq!(conflict.conflict_type, ConflictType::Data);
        assert_eq!(conflict.conflicting_fields, vec!["price".to_string()]);
        assert_eq!(conflict.remote_payload.unwrap()["price"], 4);
    }

    #[test]
    fn test_update_touching_only_insignificant_fields_applies() {
        let detector = ConflictDetector::new();
        let then = Utc::now() - Duration::minutes(5);
        let current = stored(json!({"name": "Tea", "notes": "a"}), then, false);

        // "notes" is not significant and "price" is absent from the payload
        let incoming = change(
            ChangeOperation::Update,
            Some(json!({"name": "Tea", "notes": "b"})),
            Utc::now(),
        );
        assert!(detector.detect(&incoming, Some(&current)).is_none());
    }

    #[test]
    fn test_create_over_older_record_applies() {
        let detector = ConflictDetector::new();
        let then = Utc::now() - Duration::minutes(5);
        let current = stored(json!({"name": "Tea"}), then, false);

        let incoming = change(ChangeOperation::Create, Some(json!({"name": "Coffee"})), Utc::now());
        assert!(detector.detect(&incoming, Some(&current)).is_none());
    }

    #[test]
    fn test_tombstone_handling() {
        let detector = ConflictDetector::new();
        let then = Utc::now() - Duration::minutes(5);
        let tombstone = stored(json!({}), then, true);

        let update = change(ChangeOperation::Update, Some(json!({"name": "Tea"})), Utc::now());
        let conflict = detector.detect(&update, Some(&tombstone)).unwrap();
        assert_eq!(conflict.conflict_type, ConflictType::Deleted);

        let create = change(ChangeOperation::Create, Some(json!({"name": "Tea"})), Utc::now());
        assert!(detector.detect(&create, Some(&tombstone)).is_none());

        let delete = change(ChangeOperation::Delete, None, Utc::now());
        assert!(detector.detect(&delete, Some(&tombstone)).is_none());
    }

    #[test]
    fn test_equal_timestamps_are_not_version_conflicts() {
        let detector = ConflictDetector::new();
        let now = Utc::now();
        let current = stored(json!({"name": "Tea"}), now, false);

        let incoming = change(ChangeOperation::Delete, None, now);
        assert!(detector.detect(&incoming, Some(&current)).is_none());
    }
}
