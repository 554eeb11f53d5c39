use super::PoolStore;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use cstor_core::{CStorPool, Time};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    pools: HashMap<String, CStorPool>,
    revision: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// In-process resource store with the same write semantics as the API server
///
/// UIDs are assigned on create when missing, every write bumps
/// `resourceVersion`, and an update carrying a stale version is rejected with
/// `Conflict`. Deleting a resource that still has finalizers only stamps its
/// deletion timestamp; the object goes away once the last finalizer is
/// removed.
#[derive(Debug, Clone, Default)]
pub struct MemoryPoolStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Request deletion of `name`
    pub async fn delete(&self, name: &str) -> Result<()> {
        let mut inner = self.write();
        let version = inner.next_version();
        let pool = inner
            .pools
            .get_mut(name)
            .ok_or_else(|| ControllerError::not_found(name))?;

        if pool.finalizers().is_empty() {
            inner.pools.remove(name);
            debug!(pool = %name, "Deleted");
        } else if pool.metadata.deletion_timestamp.is_none() {
            pool.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            pool.metadata.resource_version = Some(version);
            debug!(pool = %name, "Marked for deletion");
        }
        Ok(())
    }

    /// Simulate a concurrent writer by bumping the stored version
    #[cfg(test)]
    pub(crate) fn bump_version(&self, name: &str) {
        let mut inner = self.write();
        let version = inner.next_version();
        if let Some(pool) = inner.pools.get_mut(name) {
            pool.metadata.resource_version = Some(version);
        }
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn get(&self, name: &str) -> Result<CStorPool> {
        self.read()
            .pools
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::not_found(name))
    }

    async fn list(&self) -> Result<Vec<CStorPool>> {
        let mut pools: Vec<CStorPool> = self.read().pools.values().cloned().collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(pools)
    }

    async fn create(&self, pool: &CStorPool) -> Result<CStorPool> {
        let name = pool.name().to_string();
        if name.is_empty() {
            return Err(ControllerError::internal_error(
                "cannot create a CStorPool without a name",
            ));
        }

        let mut inner = self.write();
        if inner.pools.contains_key(&name) {
            return Err(ControllerError::already_exists(name));
        }

        let mut stored = pool.clone();
        if stored.uid().is_empty() {
            stored.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.resource_version = Some(inner.next_version());
        inner.pools.insert(name, stored.clone());
        Ok(stored)
    }

    async fn update(&self, pool: &CStorPool) -> Result<CStorPool> {
        let name = pool.name().to_string();
        let mut inner = self.write();
        let version = inner.next_version();
        let current = inner
            .pools
            .get(&name)
            .ok_or_else(|| ControllerError::not_found(&name))?;

        if pool.metadata.resource_version.is_some()
            && pool.metadata.resource_version != current.metadata.resource_version
        {
            return Err(ControllerError::conflict(name));
        }

        let mut stored = pool.clone();
        // Identity and deletion state are owned by the store
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        stored.metadata.resource_version = Some(version);

        if stored.is_being_deleted() && stored.finalizers().is_empty() {
            inner.pools.remove(&name);
            debug!(pool = %name, "Last finalizer removed, deleted");
        } else {
            inner.pools.insert(name, stored.clone());
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cstor_core::{PoolPhase, POOL_FINALIZER};

    #[tokio::test]
    async fn test_create_assigns_uid_and_version() {
        let store = MemoryPoolStore::new();
        let mut pool = CStorPool::new("pool1", "");
        pool.metadata.uid = None;

        let created = store.create(&pool).await.unwrap();
        assert!(!created.uid().is_empty());
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.creation_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_create_keeps_given_uid() {
        let store = MemoryPoolStore::new();
        let created = store.create(&CStorPool::new("pool1", "abc")).await.unwrap();
        assert_eq!(created.uid(), "abc");
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let store = MemoryPoolStore::new();
        store.create(&CStorPool::new("pool1", "abc")).await.unwrap();
        let err = store
            .create(&CStorPool::new("pool1", "abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryPoolStore::new();
        assert!(store.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryPoolStore::new();
        let created = store.create(&CStorPool::new("pool1", "abc")).await.unwrap();

        let first = store
            .update(&created.clone().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        assert_ne!(
            first.metadata.resource_version,
            created.metadata.resource_version
        );

        let err = store
            .update(&created.with_phase(PoolPhase::Offline))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_then_removes() {
        let store = MemoryPoolStore::new();
        store
            .create(&CStorPool::new("pool1", "abc").with_finalizer(POOL_FINALIZER))
            .await
            .unwrap();

        store.delete("pool1").await.unwrap();
        let mut marked = store.get("pool1").await.unwrap();
        assert!(marked.is_being_deleted());

        marked.remove_finalizer(POOL_FINALIZER);
        store.update(&marked).await.unwrap();
        assert!(store.get("pool1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes() {
        let store = MemoryPoolStore::new();
        store.create(&CStorPool::new("pool1", "abc")).await.unwrap();
        store.delete("pool1").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_cannot_clear_deletion_timestamp() {
        let store = MemoryPoolStore::new();
        store
            .create(&CStorPool::new("pool1", "abc").with_finalizer(POOL_FINALIZER))
            .await
            .unwrap();
        store.delete("pool1").await.unwrap();

        let mut pool = store.get("pool1").await.unwrap();
        pool.metadata.deletion_timestamp = None;
        let updated = store.update(&pool).await.unwrap();
        assert!(updated.is_being_deleted());
    }
}
