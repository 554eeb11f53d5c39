//! Pure predicates that decide what a notification means.
//!
//! Nothing here touches the store or the pool toolchain, and nothing reads
//! the process environment: the node identity is handed in at construction.

use cstor_core::{CStorPool, PoolPhase};

/// Decides whether a resource belongs to this node
#[derive(Debug, Clone)]
pub struct EventClassifier {
    node_identity: String,
}

impl EventClassifier {
    pub fn new(node_identity: impl Into<String>) -> Self {
        Self {
            node_identity: node_identity.into(),
        }
    }

    pub fn node_identity(&self) -> &str {
        &self.node_identity
    }

    /// Ownership gate: true iff the resource UID is this node's identity.
    /// Only the owner may touch the pool or write the resource.
    pub fn is_right_cstor_pool_mgmt(&self, pool: &CStorPool) -> bool {
        pool.uid() == self.node_identity
    }
}

/// True iff the resource carries a deletion timestamp
pub fn is_destroy_event(pool: &CStorPool) -> bool {
    pool.metadata.deletion_timestamp.is_some()
}

/// True iff `old` and `new` differ in nothing but status.
///
/// Server-managed bookkeeping (`resourceVersion`, `managedFields`) is
/// ignored as well, since every status write bumps it. Identical snapshots
/// count as status-only.
pub fn is_only_status_change(old: &CStorPool, new: &CStorPool) -> bool {
    normalized(old) == normalized(new)
}

fn normalized(pool: &CStorPool) -> CStorPool {
    let mut pool = pool.clone();
    pool.status = Default::default();
    pool.metadata.resource_version = None;
    pool.metadata.managed_fields = None;
    pool
}

/// True iff the resource has not been provisioned yet (phase unset or init)
pub fn is_init_status(pool: &CStorPool) -> bool {
    pool.phase() == PoolPhase::Init
}
