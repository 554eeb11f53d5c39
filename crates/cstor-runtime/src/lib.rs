// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod command;
pub mod error;
pub mod mock;
pub mod pool;
pub mod query;
pub mod zrepl;

// Re-export primary types
pub use command::{CommandRunner, ProcessRunner};
pub use error::{Result, RuntimeError};
pub use mock::{Invocation, ScriptedResponse, ScriptedRunner};
pub use pool::{check_valid_pool, PoolManager, PoolManagerConfig};
pub use query::PoolHealth;
pub use zrepl::{ZreplMonitor, ZreplMonitorConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use cstor_core::{CStorPool, PoolType};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::sync::Arc;

    // Stand-in toolchain: logs its arguments and mimics the messages the
    // pool layer keys on.
    const FAKE_ZPOOL: &str = r#"#!/bin/sh
echo "$@" >> "$(dirname "$0")/calls.log"
case "$1" in
  destroy)
    echo "cannot open '$2': no such pool" >&2
    exit 1
    ;;
  import)
    echo "cannot import: no such pool available" >&2
    exit 1
    ;;
  list)
    echo "cstor-abc"
    ;;
  status)
    printf '  pool: cstor-abc\n state: DEGRADED\n'
    ;;
esac
exit 0
"#;

    fn install_fake_zpool(dir: &Path) -> String {
        let path = dir.join("zpool");
        std::fs::write(&path, FAKE_ZPOOL).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_pool_lifecycle_against_process_runner() {
        let dir = tempfile::tempdir().unwrap();
        let zpool_bin = install_fake_zpool(dir.path());
        let pools = PoolManager::new(
            Arc::new(ProcessRunner::with_timeout(std::time::Duration::from_secs(10))),
            PoolManagerConfig { zpool_bin },
        );

        let pool = CStorPool::new("pool1", "abc")
            .with_disks(["/tmp/img1.img"])
            .with_pool_type(PoolType::Mirror)
            .with_cache_file("/tmp/pool1.cache");

        let err = pools.import_pool(&pool).await.unwrap_err();
        assert!(matches!(err, RuntimeError::PoolNotFound { .. }));

        pools.create_pool(&pool).await.unwrap();
        assert_eq!(pools.get_pool_name().await.unwrap(), "cstor-abc");
        assert!(pools.pool_exists("cstor-abc").await.unwrap());
        assert_eq!(
            pools.pool_state("cstor-abc").await.unwrap(),
            PoolHealth::Degraded
        );

        pools.delete_pool("cstor-abc").await.unwrap();
        pools
            .label_clear(&["/tmp/img1.img".to_string()])
            .await
            .unwrap();

        let log = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        let subcommands: Vec<&str> = log
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        assert_eq!(
            subcommands,
            vec!["import", "create", "list", "list", "status", "destroy", "labelclear"]
        );
        assert!(log.contains(
            "create -f -o cachefile=/tmp/pool1.cache -O io.openebs:poolname=pool1 cstor-abc mirror /tmp/img1.img"
        ));
    }
}
