//! Finalizer handling for CStorPool cleanup
//!
//! The `openebs` finalizer keeps a deleted resource around until this node
//! has destroyed the backing pool and cleared the disk labels.

use crate::error::Result;
use crate::store::{update_with_retry, PoolStore};
use cstor_core::{CStorPool, POOL_FINALIZER};
use tracing::info;

/// Remove the `openebs` finalizer from `pool`, leaving any others in place.
///
/// Works from a fresh copy of the resource so concurrent edits are not
/// clobbered. Removing an absent finalizer, or from a resource that is
/// already gone, is a successful no-op.
pub async fn remove_finalizer(store: &dyn PoolStore, pool: &CStorPool) -> Result<()> {
    let name = pool.name();
    let mut removed = false;

    update_with_retry(store, name, |latest| {
        removed = latest.remove_finalizer(POOL_FINALIZER);
        removed
    })
    .await?;

    if removed {
        info!(pool = %name, "Removed finalizer {}", POOL_FINALIZER);
    }
    Ok(())
}
