use crate::error::{Result, RuntimeError};
use crate::pool::{PoolManager, NO_SUCH_POOL};
use cstor_core::PoolPhase;
use std::fmt;
use tracing::{debug, warn};

/// Health reported on the `state:` line of `zpool status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Online,
    Degraded,
    Faulted,
    Offline,
    Unavail,
    Removed,
    Unknown,
}

impl PoolHealth {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "ONLINE" => PoolHealth::Online,
            "DEGRADED" => PoolHealth::Degraded,
            "FAULTED" => PoolHealth::Faulted,
            "OFFLINE" => PoolHealth::Offline,
            "UNAVAIL" => PoolHealth::Unavail,
            "REMOVED" => PoolHealth::Removed,
            _ => PoolHealth::Unknown,
        }
    }

    /// Map pool health onto the resource phase. A degraded pool still
    /// serves I/O.
    pub fn phase(&self) -> PoolPhase {
        match self {
            PoolHealth::Online | PoolHealth::Degraded => PoolPhase::Online,
            _ => PoolPhase::Offline,
        }
    }
}

impl fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolHealth::Online => "ONLINE",
            PoolHealth::Degraded => "DEGRADED",
            PoolHealth::Faulted => "FAULTED",
            PoolHealth::Offline => "OFFLINE",
            PoolHealth::Unavail => "UNAVAIL",
            PoolHealth::Removed => "REMOVED",
            PoolHealth::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Pull the value of the `state:` line out of `zpool status` output
pub fn parse_status_state(output: &str) -> PoolHealth {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("state:"))
        .map(PoolHealth::parse)
        .unwrap_or(PoolHealth::Unknown)
}

impl PoolManager {
    /// Name of the pool imported on this node.
    ///
    /// One pool per node is expected; if several are listed the first one
    /// wins and a warning is logged.
    pub async fn get_pool_name(&self) -> Result<String> {
        let data = self.zpool_piped(&["list", "-H", "-o", "name"]).await?;
        let listing = String::from_utf8_lossy(&data);

        let mut names = listing.lines().map(str::trim_end).filter(|l| !l.is_empty());
        let first = names.next().ok_or(RuntimeError::NoPoolImported)?;

        let extra = names.count();
        if extra > 0 {
            warn!(
                pool = %first,
                ignored = extra,
                "More than one pool imported on this node"
            );
        }

        Ok(first.to_string())
    }

    /// Whether the named pool is currently imported.
    ///
    /// Only a "no such pool" complaint means absent; any other failure of
    /// the listing is returned as an error.
    pub async fn pool_exists(&self, pool_name: &str) -> Result<bool> {
        let args = [
            "list".to_string(),
            "-H".to_string(),
            "-o".to_string(),
            "name".to_string(),
            pool_name.to_string(),
        ];
        match self.zpool(&args).await {
            Ok(_) => Ok(true),
            Err(e) if e.output_contains(NO_SUCH_POOL) => {
                debug!(pool = %pool_name, "Pool not listed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Health of the named pool
    pub async fn pool_state(&self, pool_name: &str) -> Result<PoolHealth> {
        let args = ["status".to_string(), pool_name.to_string()];
        match self.zpool(&args).await {
            Ok(data) => Ok(parse_status_state(&String::from_utf8_lossy(&data))),
            Err(e) if e.output_contains(NO_SUCH_POOL) => {
                Err(RuntimeError::pool_not_found(pool_name))
            }
            Err(e) => Err(e),
        }
    }
}
