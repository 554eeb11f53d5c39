use crate::pool::CStorPool;

/// A change notification for a pool resource
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    /// First sight of a resource
    Added(CStorPool),
    /// A resource changed; `old` is the previously observed snapshot
    Updated {
        old: Box<CStorPool>,
        new: Box<CStorPool>,
    },
    /// The resource is gone from the store
    Deleted(CStorPool),
    /// Re-read the named resource from the store and reconcile it again
    Requeue(String),
}

impl PoolEvent {
    pub fn updated(old: CStorPool, new: CStorPool) -> Self {
        Self::Updated {
            old: Box::new(old),
            new: Box::new(new),
        }
    }

    /// Name of the resource this event refers to
    pub fn resource_name(&self) -> &str {
        match self {
            PoolEvent::Added(pool) | PoolEvent::Deleted(pool) => pool.name(),
            PoolEvent::Updated { new, .. } => new.name(),
            PoolEvent::Requeue(name) => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PoolEvent::Added(_) => "added",
            PoolEvent::Updated { .. } => "updated",
            PoolEvent::Deleted(_) => "deleted",
            PoolEvent::Requeue(_) => "requeue",
        }
    }
}
