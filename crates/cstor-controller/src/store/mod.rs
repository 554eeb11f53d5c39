mod api;
mod memory;

pub use api::ApiPoolStore;
pub use memory::MemoryPoolStore;

use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use cstor_core::CStorPool;
use tracing::debug;

/// How many times a write is retried after losing an optimistic-concurrency race
pub const MAX_CONFLICT_RETRIES: u32 = 5;

/// Trait for the resource store holding CStorPool objects
///
/// `MemoryPoolStore` keeps everything in process for tests and local runs;
/// `ApiPoolStore` talks to the cluster API over HTTP.
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Fetch a resource by name; `NotFound` if it does not exist.
    async fn get(&self, name: &str) -> Result<CStorPool>;

    /// All resources, in no particular order.
    async fn list(&self) -> Result<Vec<CStorPool>>;

    /// Create a resource; `AlreadyExists` if the name is taken.
    async fn create(&self, pool: &CStorPool) -> Result<CStorPool>;

    /// Replace a resource. A stale `resourceVersion` yields `Conflict`.
    async fn update(&self, pool: &CStorPool) -> Result<CStorPool>;
}

/// Read the latest copy of `name`, apply `mutate`, and write it back,
/// retrying when another writer got there first.
///
/// `mutate` returns `false` when the resource is already as wanted, in which
/// case nothing is written. A resource that has disappeared resolves to
/// `Ok(None)`.
pub async fn update_with_retry<F>(
    store: &dyn PoolStore,
    name: &str,
    mut mutate: F,
) -> Result<Option<CStorPool>>
where
    F: FnMut(&mut CStorPool) -> bool + Send,
{
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let mut pool = match store.get(name).await {
            Ok(p) => p,
            Err(ControllerError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        if !mutate(&mut pool) {
            return Ok(Some(pool));
        }

        match store.update(&pool).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(ControllerError::NotFound { .. }) => return Ok(None),
            Err(ControllerError::Conflict { .. }) => {
                debug!(pool = %name, attempt, "Write conflict, re-reading");
            }
            Err(e) => return Err(e),
        }
    }

    Err(ControllerError::ConflictRetriesExhausted {
        name: name.to_string(),
        attempts: MAX_CONFLICT_RETRIES,
    })
}
