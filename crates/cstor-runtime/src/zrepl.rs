use crate::error::{Result, RuntimeError};
use crate::pool::PoolManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Name used for the replication service in logs and errors
pub const ZREPL_SERVICE: &str = "zrepl";

/// Configuration for the replication service readiness gate
#[derive(Debug, Clone)]
pub struct ZreplMonitorConfig {
    /// Delay after the first failed readiness check
    pub initial_interval: Duration,
    /// Upper bound for the delay between checks
    pub max_interval: Duration,
    /// Give up after this long; `None` waits until cancelled
    pub timeout: Option<Duration>,
}

impl Default for ZreplMonitorConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Liveness gate for the replication service that shares the pool toolchain
///
/// Pool operations issued before the service finishes its own startup
/// recovery can race with it, so the controller waits here first. The gate
/// only delays; it does not serialize access to the pool.
pub struct ZreplMonitor {
    pools: Arc<PoolManager>,
    config: ZreplMonitorConfig,
    ready: AtomicBool,
}

impl ZreplMonitor {
    pub fn new(pools: Arc<PoolManager>, config: ZreplMonitorConfig) -> Self {
        Self {
            pools,
            config,
            ready: AtomicBool::new(false),
        }
    }

    /// Whether the service has been observed running
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// One readiness check: `zpool status` only answers once the service is up
    pub async fn check_ready(&self) -> bool {
        match self.pools.zpool(&["status".to_string()]).await {
            Ok(_) => true,
            Err(e) => {
                debug!("{} not ready: {}", ZREPL_SERVICE, e);
                false
            }
        }
    }

    /// Block until the service answers, polling with a doubling delay.
    ///
    /// Returns `DependencyTimeout` once the configured bound elapses and
    /// `Cancelled` when `token` fires first. Both also cut short a check
    /// that is still running.
    pub async fn wait_until_ready(&self, token: &CancellationToken) -> Result<()> {
        if self.is_ready() {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = self.config.timeout.map(|t| started + t);
        let timed_out =
            || RuntimeError::dependency_timeout(ZREPL_SERVICE, started.elapsed().as_secs());
        let mut delay = self.config.initial_interval;

        loop {
            let ready = tokio::select! {
                _ = token.cancelled() => return Err(RuntimeError::Cancelled),
                _ = expires(deadline) => return Err(timed_out()),
                ready = self.check_ready() => ready,
            };

            if ready {
                self.ready.store(true, Ordering::Release);
                info!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    "{} is available", ZREPL_SERVICE
                );
                return Ok(());
            }

            info!(
                retry_in_ms = delay.as_millis() as u64,
                "Waiting for {}...", ZREPL_SERVICE
            );

            tokio::select! {
                _ = token.cancelled() => return Err(RuntimeError::Cancelled),
                _ = expires(deadline) => return Err(timed_out()),
                _ = tokio::time::sleep(delay) => {}
            }

            delay = (delay * 2).min(self.config.max_interval);
        }
    }
}

/// Resolves at `deadline`, or never when there is none
async fn expires(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
