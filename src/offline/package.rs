//! Data package integrity
//!
//! The checksum is the SHA-256 of the JSON serialization of the package's
//! `entities` map. `BTreeMap` keys and repository ordering keep that
//! serialization stable, so a receiver can recompute it.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::types::OfflineDataPackage;
use crate::store::{EntityKind, EntityRecord};

/// Serialized size and SHA-256 hex checksum of a package's entities
pub fn compute_checksum(
    entities: &BTreeMap<EntityKind, Vec<EntityRecord>>,
) -> Result<(usize, String), serde_json::Error> {
    let bytes = serde_json::to_vec(entities)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok((bytes.len(), hex::encode(hasher.finalize())))
}

impl OfflineDataPackage {
    /// Recompute the checksum and compare it with the recorded metadata
    pub fn verify(&self) -> Result<bool, serde_json::Error> {
        let (byte_size, checksum) = compute_checksum(&self.entities)?;
        Ok(byte_size == self.metadata.byte_size && checksum == self.metadata.checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::types::{PackageMetadata, PACKAGE_FORMAT_VERSION};
    use chrono::Utc;
    use serde_json::json;

    fn package() -> OfflineDataPackage {
        let now = Utc::now();
        let mut entities = BTreeMap::new();
        entities.insert(
            EntityKind::Product,
            vec![EntityRecord {
                id: "p-1".to_string(),
                kind: EntityKind::Product,
                data: json!({"name": "Tea", "price": 3}),
                branch_id: None,
                version: 1,
                created_at: now,
                updated_at: now,
                deleted: false,
            }],
        );
        let (byte_size, checksum) = compute_checksum(&entities).unwrap();

        OfflineDataPackage {
            session_id: "s-1".to_string(),
            timestamp: now,
            entities,
            metadata: PackageMetadata {
                format_version: PACKAGE_FORMAT_VERSION.to_string(),
                last_sync_time: now,
                byte_size,
                checksum,
            },
        }
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        let pkg = package();
        assert_eq!(pkg.metadata.checksum.len(), 64);
        assert!(pkg.metadata.checksum.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(pkg.verify().unwrap());
    }

    #[test]
    fn test_survives_json_transport() {
        let pkg = package();
        let wire = serde_json::to_string(&pkg).unwrap();
        let received: OfflineDataPackage = serde_json::from_str(&wire).unwrap();
        assert!(received.verify().unwrap());
    }

    #[test]
    fn test_tampering_is_detected() {
        let mut pkg = package();
        pkg.entities.get_mut(&EntityKind::Product).unwrap()[0].data["price"] = json!(4);
        assert!(!pkg.verify().unwrap());
    }
}
