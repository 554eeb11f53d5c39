use crate::error::Result;
use crate::store::PoolStore;
use cstor_core::{CStorPool, PoolEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Turns periodic listings of the store into change notifications
///
/// The first listing reports every resource as `Added`, which is how a
/// restarted agent rediscovers pools it provisioned earlier.
pub struct PoolWatcher {
    store: Arc<dyn PoolStore>,
    interval: Duration,
    cache: HashMap<String, CStorPool>,
}

impl PoolWatcher {
    pub fn new(store: Arc<dyn PoolStore>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            cache: HashMap::new(),
        }
    }

    /// List the store once and diff against the previous listing
    pub async fn poll_once(&mut self) -> Result<Vec<PoolEvent>> {
        let listed = self.store.list().await?;
        let mut events = Vec::new();
        let mut seen = HashMap::with_capacity(listed.len());

        for pool in listed {
            let name = pool.name().to_string();
            match self.cache.remove(&name) {
                None => events.push(PoolEvent::Added(pool.clone())),
                Some(old) if changed(&old, &pool) => {
                    events.push(PoolEvent::updated(old, pool.clone()))
                }
                Some(_) => {}
            }
            seen.insert(name, pool);
        }

        // Anything left over has disappeared from the store
        let mut gone: Vec<CStorPool> = self.cache.drain().map(|(_, p)| p).collect();
        gone.sort_by(|a, b| a.name().cmp(b.name()));
        events.extend(gone.into_iter().map(PoolEvent::Deleted));

        self.cache = seen;
        Ok(events)
    }

    /// Poll until cancelled, forwarding events to `tx`.
    ///
    /// A failed listing is logged and retried on the next tick. The loop
    /// ends when the receiver goes away.
    pub async fn run(mut self, tx: mpsc::Sender<PoolEvent>, token: CancellationToken) {
        info!("Starting pool watcher (interval: {:?})", self.interval);

        loop {
            match self.poll_once().await {
                Ok(events) => {
                    for event in events {
                        debug!(pool = %event.resource_name(), kind = event.kind(), "Observed");
                        if tx.send(event).await.is_err() {
                            info!("Event receiver closed, stopping pool watcher");
                            return;
                        }
                    }
                }
                Err(e) => warn!("Failed to list CStorPools: {} - will retry", e),
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Pool watcher shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

fn changed(old: &CStorPool, new: &CStorPool) -> bool {
    match (&old.metadata.resource_version, &new.metadata.resource_version) {
        (Some(a), Some(b)) => a != b,
        _ => old != new,
    }
}
