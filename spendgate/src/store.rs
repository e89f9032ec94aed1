//! Durable persistence of spend-permission grants.
//!
//! Grants are append-only and unique by [`PermissionKey`]. Creating a grant
//! whose key already exists is idempotent when the stored fields are identical
//! (the existing record is returned and no duplicate is written) and a
//! [`StorageError::ConstraintViolation`] when they differ. Every
//! implementation must apply the same policy so repeated submissions behave
//! deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;

use crate::BoxFuture;
use crate::error::StorageError;
use crate::permission::{PermissionKey, SpendPermission};

/// A persisted grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPermission {
    /// Store-assigned identifier.
    pub id: i64,
    /// The grant exactly as submitted.
    #[serde(flatten)]
    pub permission: SpendPermission,
    /// When the record was first written.
    pub created_at: DateTime<Utc>,
}

/// A record store for spend-permission grants.
pub trait PermissionStore: Send + Sync {
    /// Persists a grant, or returns the existing identical record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConstraintViolation`] if a different grant is
    /// already stored under the same key, or
    /// [`StorageError::ConnectionFailure`] if the store is unreachable.
    fn create<'a>(
        &'a self,
        permission: &'a SpendPermission,
    ) -> BoxFuture<'a, Result<StoredPermission, StorageError>>;

    /// Looks a grant up by its unique key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ConnectionFailure`] if the store is unreachable.
    fn find<'a>(
        &'a self,
        key: &'a PermissionKey,
    ) -> BoxFuture<'a, Result<Option<StoredPermission>, StorageError>>;
}

impl<T: PermissionStore + ?Sized> PermissionStore for Arc<T> {
    fn create<'a>(
        &'a self,
        permission: &'a SpendPermission,
    ) -> BoxFuture<'a, Result<StoredPermission, StorageError>> {
        (**self).create(permission)
    }

    fn find<'a>(
        &'a self,
        key: &'a PermissionKey,
    ) -> BoxFuture<'a, Result<Option<StoredPermission>, StorageError>> {
        (**self).find(key)
    }
}

/// Builds the conflict message shared by all store implementations.
#[must_use]
pub fn conflict_message(key: &PermissionKey) -> String {
    format!("A different spend permission is already stored for {key}")
}

/// An in-process [`PermissionStore`] backed by a concurrent map.
///
/// Suitable for development and tests; records do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryPermissionStore {
    records: DashMap<PermissionKey, StoredPermission>,
    next_id: AtomicI64,
}

impl MemoryPermissionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no grants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&self, permission: &SpendPermission) -> Result<StoredPermission, StorageError> {
        let key = permission.key();
        match self.records.entry(key) {
            Entry::Occupied(existing) => {
                if existing.get().permission == *permission {
                    Ok(existing.get().clone())
                } else {
                    Err(StorageError::ConstraintViolation(conflict_message(&key)))
                }
            }
            Entry::Vacant(slot) => {
                let record = StoredPermission {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
                    permission: permission.clone(),
                    created_at: Utc::now(),
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }
}

impl PermissionStore for MemoryPermissionStore {
    fn create<'a>(
        &'a self,
        permission: &'a SpendPermission,
    ) -> BoxFuture<'a, Result<StoredPermission, StorageError>> {
        Box::pin(std::future::ready(self.insert(permission)))
    }

    fn find<'a>(
        &'a self,
        key: &'a PermissionKey,
    ) -> BoxFuture<'a, Result<Option<StoredPermission>, StorageError>> {
        let found = self.records.get(key).map(|r| r.value().clone());
        Box::pin(std::future::ready(Ok(found)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::aliases::U160;
    use alloy_primitives::{Address, Bytes, U256};

    fn permission(salt: u64) -> SpendPermission {
        SpendPermission {
            account: Address::repeat_byte(0xAA),
            spender: Address::repeat_byte(0xBB),
            token: Address::repeat_byte(0xCC),
            allowance: U160::from(1_000_000u64),
            period: 86_400,
            start: 1_700_000_000,
            end: crate::permission::MAX_UINT48,
            salt: U256::from(salt),
            extra_data: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let store = MemoryPermissionStore::new();
        let created = store.create(&permission(1)).await.unwrap();
        let found = store.find(&permission(1).key()).await.unwrap().unwrap();
        assert_eq!(created, found);
        assert_eq!(found.permission, permission(1));
    }

    #[tokio::test]
    async fn test_find_unknown_key() {
        let store = MemoryPermissionStore::new();
        assert!(store.find(&permission(7).key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_resubmission_is_idempotent() {
        let store = MemoryPermissionStore::new();
        let first = store.create(&permission(1)).await.unwrap();
        for _ in 0..3 {
            let again = store.create(&permission(1)).await.unwrap();
            assert_eq!(again.id, first.id);
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_divergent_resubmission_conflicts() {
        let store = MemoryPermissionStore::new();
        store.create(&permission(1)).await.unwrap();
        let mut changed = permission(1);
        changed.allowance = U160::from(5u64);
        for _ in 0..3 {
            let err = store.create(&changed).await.unwrap_err();
            assert!(matches!(err, StorageError::ConstraintViolation(_)));
        }
        let stored = store.find(&changed.key()).await.unwrap().unwrap();
        assert_eq!(stored.permission, permission(1));
    }

    #[tokio::test]
    async fn test_distinct_salts_are_distinct_records() {
        let store = MemoryPermissionStore::new();
        let a = store.create(&permission(1)).await.unwrap();
        let b = store.create(&permission(2)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_stored_permission_flattens_fields() {
        let record = StoredPermission {
            id: 3,
            permission: permission(1),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["salt"], "1");
        assert!(json.get("createdAt").is_some());
    }
}
