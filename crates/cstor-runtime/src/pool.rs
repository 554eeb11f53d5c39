use crate::command::CommandRunner;
use crate::error::{Result, RuntimeError};
use cstor_core::CStorPool;
use std::sync::Arc;
use tracing::{error, info, warn};

/// User property recording which resource a pool belongs to
pub const POOLNAME_PROPERTY: &str = "io.openebs:poolname";

// Fragments the pool toolchain prints for outcomes we treat as success or as
// "absent" rather than as failures.
pub(crate) const NO_SUCH_POOL: &str = "no such pool";
const ALREADY_EXISTS: &str = "already exists";
const ALREADY_IMPORTED: &str = "already imported";

/// Configuration for the pool lifecycle manager
#[derive(Debug, Clone)]
pub struct PoolManagerConfig {
    /// Pool toolchain binary (e.g., "zpool" or an absolute path)
    pub zpool_bin: String,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            zpool_bin: "zpool".to_string(),
        }
    }
}

/// Translates pool resources into pool toolchain invocations
///
/// Every operation here is safe to re-run: notifications are delivered at
/// least once, so "already in the desired state" is reported as success.
pub struct PoolManager {
    runner: Arc<dyn CommandRunner>,
    config: PoolManagerConfig,
}

/// Fail unless the resource carries the two things every pool operation needs
pub fn check_valid_pool(pool: &CStorPool) -> Result<()> {
    if pool.uid().is_empty() {
        return Err(RuntimeError::EmptyPoolName);
    }
    if pool.disks().is_empty() {
        return Err(RuntimeError::EmptyDiskList);
    }
    Ok(())
}

/// Arguments for `zpool create`
pub fn create_pool_args(pool: &CStorPool) -> Vec<String> {
    let mut args = vec!["create".to_string(), "-f".to_string()];

    if !pool.cache_file().is_empty() {
        args.push("-o".to_string());
        args.push(format!("cachefile={}", pool.cache_file()));
    }

    args.push("-O".to_string());
    args.push(format!("{}={}", POOLNAME_PROPERTY, pool.name()));
    args.push(pool.pool_name());

    if let Some(keyword) = pool.pool_type().vdev_keyword() {
        args.push(keyword.to_string());
    }
    args.extend(pool.disks().iter().cloned());
    args
}

/// Arguments for `zpool import`
pub fn import_pool_args(pool: &CStorPool) -> Vec<String> {
    let mut args = vec!["import".to_string()];

    if !pool.cache_file().is_empty() {
        args.push("-c".to_string());
        args.push(pool.cache_file().to_string());
        args.push("-o".to_string());
        args.push(format!("cachefile={}", pool.cache_file()));
    }

    args.push(pool.pool_name());
    args
}

impl PoolManager {
    pub fn new(runner: Arc<dyn CommandRunner>, config: PoolManagerConfig) -> Self {
        Self { runner, config }
    }

    pub(crate) async fn zpool(&self, args: &[String]) -> Result<Vec<u8>> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.runner
            .run_combined_output(&self.config.zpool_bin, &args)
            .await
    }

    pub(crate) async fn zpool_piped(&self, args: &[&str]) -> Result<Vec<u8>> {
        self.runner
            .run_stdout_pipe(&self.config.zpool_bin, args)
            .await
    }

    /// Create the pool described by the resource.
    ///
    /// Validation runs first; an invalid resource never reaches the runner.
    pub async fn create_pool(&self, pool: &CStorPool) -> Result<()> {
        check_valid_pool(pool)?;

        let pool_name = pool.pool_name();
        info!(
            pool = %pool_name,
            layout = %pool.pool_type(),
            disks = pool.disks().len(),
            "Creating pool"
        );

        self.zpool(&create_pool_args(pool)).await.inspect_err(|e| {
            error!(pool = %pool_name, "Unable to create pool: {}", e);
        })?;

        info!(pool = %pool_name, "Pool created");
        Ok(())
    }

    /// Re-attach an existing on-disk pool, e.g. after the agent restarts.
    ///
    /// An already imported pool counts as success. A pool that cannot be
    /// found at all is reported as `PoolNotFound` so the caller can decide
    /// to create it.
    pub async fn import_pool(&self, pool: &CStorPool) -> Result<()> {
        check_valid_pool(pool)?;

        let pool_name = pool.pool_name();
        info!(pool = %pool_name, "Importing pool");

        match self.zpool(&import_pool_args(pool)).await {
            Ok(_) => {
                info!(pool = %pool_name, "Pool imported");
                Ok(())
            }
            Err(e) if e.output_contains(ALREADY_EXISTS) || e.output_contains(ALREADY_IMPORTED) => {
                info!(pool = %pool_name, "Pool already imported");
                Ok(())
            }
            Err(e) if e.output_contains(NO_SUCH_POOL) => {
                info!(pool = %pool_name, "No pool available to import");
                Err(RuntimeError::pool_not_found(pool_name))
            }
            Err(e) => {
                error!(pool = %pool_name, "Unable to import pool: {}", e);
                Err(e)
            }
        }
    }

    /// Destroy a pool by name. A pool that does not exist is a no-op, since
    /// destroy may be retried after a partial success.
    pub async fn delete_pool(&self, pool_name: &str) -> Result<()> {
        if pool_name.is_empty() {
            return Err(RuntimeError::EmptyPoolName);
        }

        info!(pool = %pool_name, "Destroying pool");

        match self
            .zpool(&["destroy".to_string(), pool_name.to_string()])
            .await
        {
            Ok(_) => {
                info!(pool = %pool_name, "Pool destroyed");
                Ok(())
            }
            Err(e) if e.output_contains(NO_SUCH_POOL) => {
                info!(pool = %pool_name, "Pool already absent, nothing to destroy");
                Ok(())
            }
            Err(e) => {
                error!(pool = %pool_name, "Unable to destroy pool: {}", e);
                Err(e)
            }
        }
    }

    /// Clear pool labels from every disk so they can be reused safely.
    ///
    /// Each disk is attempted; any failure is reported once all disks have
    /// been tried.
    pub async fn label_clear(&self, disks: &[String]) -> Result<()> {
        let mut failed = Vec::new();

        for disk in disks {
            let args = ["labelclear".to_string(), "-f".to_string(), disk.clone()];
            if let Err(e) = self.zpool(&args).await {
                warn!(disk = %disk, "Unable to clear label: {}", e);
                failed.push(disk.clone());
            }
        }

        if !failed.is_empty() {
            error!(
                failed = failed.len(),
                total = disks.len(),
                "Label clear failed"
            );
            return Err(RuntimeError::label_clear_failed(&failed));
        }

        info!(disks = disks.len(), "Labels cleared");
        Ok(())
    }
}
