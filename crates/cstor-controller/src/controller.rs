use crate::backoff::RequeueBackoff;
use crate::classifier::{is_destroy_event, is_init_status, is_only_status_change, EventClassifier};
use crate::error::{ControllerError, Result};
use crate::finalizer::remove_finalizer;
use crate::store::{update_with_retry, PoolStore};
use cstor_core::{CStorPool, PoolEvent, PoolPhase};
use cstor_runtime::{check_valid_pool, PoolManager, RuntimeError, ZreplMonitor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the pool controller
#[derive(Debug, Clone)]
pub struct PoolControllerConfig {
    /// Identity token of this node; only resources with this UID are acted on
    pub node_identity: String,
    /// First requeue delay after a failed reconcile
    pub requeue_base: Duration,
    /// Upper bound for the requeue delay
    pub requeue_max: Duration,
}

impl PoolControllerConfig {
    pub fn new(node_identity: impl Into<String>) -> Self {
        Self {
            node_identity: node_identity.into(),
            requeue_base: Duration::from_secs(1),
            requeue_max: Duration::from_secs(300),
        }
    }
}

/// What handling a notification amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A reconcile ran to completion
    Reconciled,
    /// Nothing was done (foreign resource, status echo, removal notice)
    Ignored,
}

/// Pool controller that consumes CStorPool notifications and drives the
/// on-disk pool lifecycle for this node
pub struct PoolController {
    classifier: EventClassifier,
    pools: Arc<PoolManager>,
    store: Arc<dyn PoolStore>,
    zrepl: Option<Arc<ZreplMonitor>>,
    backoff: Mutex<RequeueBackoff>,
}

impl PoolController {
    pub fn new(
        pools: Arc<PoolManager>,
        store: Arc<dyn PoolStore>,
        config: PoolControllerConfig,
    ) -> Self {
        Self {
            classifier: EventClassifier::new(config.node_identity),
            pools,
            store,
            zrepl: None,
            backoff: Mutex::new(RequeueBackoff::new(config.requeue_base, config.requeue_max)),
        }
    }

    /// Gate notification handling on the replication service
    pub fn with_zrepl(mut self, zrepl: Arc<ZreplMonitor>) -> Self {
        self.zrepl = Some(zrepl);
        self
    }

    pub fn classifier(&self) -> &EventClassifier {
        &self.classifier
    }

    /// Run the controller until `token` fires or the event channel closes.
    ///
    /// Waits for the replication service first and returns its error if
    /// that wait fails. Failed reconciles are fed back through `requeue_tx`
    /// as `Requeue` events after a per-resource backoff.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<PoolEvent>,
        requeue_tx: mpsc::Sender<PoolEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!(
            "Starting pool controller for node '{}'",
            self.classifier.node_identity()
        );

        if let Some(zrepl) = &self.zrepl {
            zrepl.wait_until_ready(&token).await?;
        }

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    info!("Pool controller shutting down");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Event channel closed, stopping pool controller");
                        return Ok(());
                    }
                },
            };

            let name = event.resource_name().to_string();
            match self.handle_event(event).await {
                // Only a completed reconcile clears the failure count
                Ok(Outcome::Reconciled) => self.backoff.lock().await.forget(&name),
                Ok(Outcome::Ignored) => {}
                Err(e) => {
                    error!(pool = %name, "Failed to reconcile CStorPool: {}", e);
                    self.schedule_requeue(name, &requeue_tx, &token).await;
                }
            }
        }
    }

    async fn schedule_requeue(
        &self,
        name: String,
        requeue_tx: &mpsc::Sender<PoolEvent>,
        token: &CancellationToken,
    ) {
        let delay = self.backoff.lock().await.next_delay(&name);
        info!(pool = %name, delay_ms = delay.as_millis() as u64, "Requeueing");

        let tx = requeue_tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.send(PoolEvent::Requeue(name)).await.is_err() {
                        debug!("Requeue channel closed");
                    }
                }
            }
        });
    }

    /// Classify one notification and act on it
    pub async fn handle_event(&self, event: PoolEvent) -> Result<Outcome> {
        match event {
            PoolEvent::Added(pool) => self.reconcile(&pool).await,
            PoolEvent::Updated { old, new } => {
                if !self.classifier.is_right_cstor_pool_mgmt(&new) {
                    debug!(pool = %new.name(), "Not owned by this node, ignoring");
                    return Ok(Outcome::Ignored);
                }
                if is_only_status_change(&old, &new) {
                    debug!(pool = %new.name(), "Status-only change, ignoring");
                    return Ok(Outcome::Ignored);
                }
                self.reconcile(&new).await
            }
            PoolEvent::Deleted(pool) => {
                debug!(pool = %pool.name(), "Removed from the store");
                Ok(Outcome::Ignored)
            }
            PoolEvent::Requeue(name) => match self.store.get(&name).await {
                Ok(pool) => self.reconcile(&pool).await,
                Err(ControllerError::NotFound { .. }) => {
                    debug!(pool = %name, "Gone before requeue, nothing to do");
                    Ok(Outcome::Ignored)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// Drive one resource towards its desired state
    pub async fn reconcile(&self, pool: &CStorPool) -> Result<Outcome> {
        if !self.classifier.is_right_cstor_pool_mgmt(pool) {
            debug!(pool = %pool.name(), "Not owned by this node, ignoring");
            return Ok(Outcome::Ignored);
        }

        if is_destroy_event(pool) {
            self.destroy(pool).await?;
        } else if is_init_status(pool) || pool.phase() == PoolPhase::Error {
            self.provision(pool).await?;
        } else {
            match pool.phase() {
                PoolPhase::Online | PoolPhase::Offline => self.recover(pool).await?,
                phase => {
                    debug!(pool = %pool.name(), %phase, "Nothing to do");
                    return Ok(Outcome::Ignored);
                }
            }
        }
        Ok(Outcome::Reconciled)
    }

    /// Destroy the pool, clear the disk labels, then release the finalizer
    async fn destroy(&self, pool: &CStorPool) -> Result<()> {
        let pool_name = pool.pool_name();
        info!(pool = %pool.name(), "Destroying pool {}", pool_name);

        // A retry after a failed cleanup stays in Error until it succeeds
        if pool.phase() != PoolPhase::Error {
            self.set_phase(pool.name(), PoolPhase::Deleting).await?;
        }

        let cleanup = async {
            self.pools.delete_pool(&pool_name).await?;
            self.pools.label_clear(pool.disks()).await
        };

        if let Err(e) = cleanup.await {
            error!(pool = %pool.name(), "Pool cleanup failed: {}", e);
            self.set_phase(pool.name(), PoolPhase::Error).await?;
            return Err(e.into());
        }

        remove_finalizer(self.store.as_ref(), pool).await?;
        info!(pool = %pool.name(), "Pool {} destroyed", pool_name);
        Ok(())
    }

    /// Bring up the pool for a resource that has not been provisioned yet.
    ///
    /// Import is tried first so a previously created pool is re-attached
    /// rather than created again over its disks.
    async fn provision(&self, pool: &CStorPool) -> Result<()> {
        if let Err(e) = check_valid_pool(pool) {
            warn!(pool = %pool.name(), "Invalid CStorPool: {}", e);
            self.set_phase(pool.name(), PoolPhase::Error).await?;
            return Err(e.into());
        }

        let attached = match self.pools.import_pool(pool).await {
            Ok(()) => {
                info!(pool = %pool.name(), "Imported existing pool {}", pool.pool_name());
                Ok(())
            }
            Err(RuntimeError::PoolNotFound { .. }) => {
                info!(pool = %pool.name(), "No pool to import, creating {}", pool.pool_name());
                self.pools.create_pool(pool).await
            }
            Err(e) => Err(e),
        };

        match attached {
            Ok(()) => {
                self.set_phase(pool.name(), PoolPhase::Online).await?;
                info!(pool = %pool.name(), "Pool {} is online", pool.pool_name());
                Ok(())
            }
            Err(e) => {
                error!(pool = %pool.name(), "Provisioning failed: {}", e);
                self.set_phase(pool.name(), PoolPhase::Error).await?;
                Err(e.into())
            }
        }
    }

    /// Make sure an already provisioned pool is imported and report its health
    async fn recover(&self, pool: &CStorPool) -> Result<()> {
        let pool_name = pool.pool_name();

        if !self.pools.pool_exists(&pool_name).await? {
            info!(pool = %pool.name(), "Pool {} not imported, importing", pool_name);
            if let Err(e) = self.pools.import_pool(pool).await {
                warn!(pool = %pool.name(), "Import of provisioned pool failed: {}", e);
                self.set_phase(pool.name(), PoolPhase::Offline).await?;
                return Err(e.into());
            }
        }

        let health = self.pools.pool_state(&pool_name).await?;
        debug!(pool = %pool.name(), %health, "Pool health");
        self.set_phase(pool.name(), health.phase()).await
    }

    #[cfg(test)]
    async fn failures(&self, name: &str) -> u32 {
        self.backoff.lock().await.failures(name)
    }

    /// Persist a phase; a no-op when the stored phase already matches
    async fn set_phase(&self, name: &str, phase: PoolPhase) -> Result<()> {
        let written = update_with_retry(self.store.as_ref(), name, |latest| {
            if latest.status.phase == Some(phase) {
                return false;
            }
            latest.status.phase = Some(phase);
            true
        })
        .await?;

        if written.is_none() {
            debug!(pool = %name, %phase, "Resource gone, phase not written");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPoolStore;
    use crate::watcher::PoolWatcher;
    use cstor_core::{PoolType, POOL_FINALIZER};
    use cstor_runtime::{
        PoolManagerConfig, ScriptedResponse, ScriptedRunner, ZreplMonitorConfig,
    };

    struct Harness {
        runner: ScriptedRunner,
        store: MemoryPoolStore,
        controller: Arc<PoolController>,
    }

    fn harness(node_identity: &str) -> Harness {
        harness_with_backoff(
            node_identity,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
    }

    fn harness_with_backoff(node_identity: &str, base: Duration, max: Duration) -> Harness {
        let runner = ScriptedRunner::new();
        let store = MemoryPoolStore::new();
        let pools = Arc::new(PoolManager::new(
            Arc::new(runner.clone()),
            PoolManagerConfig::default(),
        ));
        let mut config = PoolControllerConfig::new(node_identity);
        config.requeue_base = base;
        config.requeue_max = max;
        let controller = Arc::new(PoolController::new(
            pools,
            Arc::new(store.clone()),
            config,
        ));
        Harness {
            runner,
            store,
            controller,
        }
    }

    fn pool1() -> CStorPool {
        CStorPool::new("pool1", "abc")
            .with_finalizer(POOL_FINALIZER)
            .with_disks(["/tmp/img1.img"])
            .with_pool_type(PoolType::Mirror)
            .with_cache_file("/tmp/pool1.cache")
    }

    fn no_pool_to_import(runner: &ScriptedRunner) {
        runner.push(
            "import",
            ScriptedResponse::fail(1, "cannot import 'cstor-abc': no such pool available"),
        );
    }

    #[tokio::test]
    async fn test_first_sight_creates_mirror_pool() {
        let h = harness("abc");
        let pool = h.store.create(&pool1()).await.unwrap();
        no_pool_to_import(&h.runner);

        h.controller
            .handle_event(PoolEvent::Added(pool))
            .await
            .unwrap();

        assert_eq!(h.runner.subcommands(), vec!["import", "create"]);
        let create = &h.runner.calls_for("create")[0];
        assert!(create.args.contains(&"mirror".to_string()));
        assert_eq!(create.args.last().unwrap(), "/tmp/img1.img");
        assert_eq!(
            h.store.get("pool1").await.unwrap().phase(),
            PoolPhase::Online
        );
    }

    #[tokio::test]
    async fn test_existing_pool_is_imported_not_created() {
        let h = harness("abc");
        let pool = h.store.create(&pool1()).await.unwrap();

        h.controller
            .handle_event(PoolEvent::Added(pool))
            .await
            .unwrap();

        assert_eq!(h.runner.subcommands(), vec!["import"]);
        assert_eq!(
            h.store.get("pool1").await.unwrap().phase(),
            PoolPhase::Online
        );
    }

    #[tokio::test]
    async fn test_destroy_then_finalizer_cleared() {
        let h = harness("abc");
        h.store
            .create(&pool1().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        h.store.delete("pool1").await.unwrap();
        let deleting = h.store.get("pool1").await.unwrap();
        assert!(deleting.is_being_deleted());

        let outcome = h
            .controller
            .handle_event(PoolEvent::Added(deleting))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Reconciled);
        assert_eq!(h.runner.subcommands(), vec!["destroy", "labelclear"]);
        assert_eq!(h.runner.calls_for("destroy")[0].args[1], "cstor-abc");
        // Finalizer gone, so the store has finished the deletion
        assert!(h.store.get("pool1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_finalizer() {
        let h = harness("abc");
        h.store.create(&pool1()).await.unwrap();
        h.store.delete("pool1").await.unwrap();
        let deleting = h.store.get("pool1").await.unwrap();
        h.runner
            .push("destroy", ScriptedResponse::fail(1, "pool is busy"));

        let err = h
            .controller
            .handle_event(PoolEvent::Added(deleting))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RuntimeError(RuntimeError::CommandFailed { .. })
        ));

        let stored = h.store.get("pool1").await.unwrap();
        assert!(stored.has_finalizer(POOL_FINALIZER));
        assert_eq!(stored.phase(), PoolPhase::Error);
        assert!(h.runner.calls_for("labelclear").is_empty());
    }

    #[tokio::test]
    async fn test_deletion_marked_by_update_destroys_pool() {
        let h = harness("abc");
        let before = h
            .store
            .create(&pool1().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        h.store.delete("pool1").await.unwrap();
        let after = h.store.get("pool1").await.unwrap();

        let outcome = h
            .controller
            .handle_event(PoolEvent::updated(before, after))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Reconciled);
        assert_eq!(h.runner.subcommands(), vec!["destroy", "labelclear"]);
        assert!(h.store.get("pool1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_destroy_retry_after_label_clear_failure() {
        let h = harness("abc");
        h.store
            .create(&pool1().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        h.store.delete("pool1").await.unwrap();
        let deleting = h.store.get("pool1").await.unwrap();
        h.runner.push(
            "labelclear",
            ScriptedResponse::fail(1, "failed to clear label for /tmp/img1.img"),
        );

        assert!(h
            .controller
            .handle_event(PoolEvent::Added(deleting))
            .await
            .is_err());
        let stored = h.store.get("pool1").await.unwrap();
        assert_eq!(stored.phase(), PoolPhase::Error);
        assert!(stored.has_finalizer(POOL_FINALIZER));

        // The pool went away on the first pass
        h.runner.push(
            "destroy",
            ScriptedResponse::fail(1, "cannot open 'cstor-abc': no such pool"),
        );
        let outcome = h
            .controller
            .handle_event(PoolEvent::Requeue("pool1".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Reconciled);
        assert_eq!(
            h.runner.subcommands(),
            vec!["destroy", "labelclear", "destroy", "labelclear"]
        );
        assert!(h.store.get("pool1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_foreign_resource_runs_nothing() {
        let h = harness("awer");
        let pool = h
            .store
            .create(&CStorPool::new("pool2", "abcd").with_disks(["/tmp/img2.img"]))
            .await
            .unwrap();

        for event in [
            PoolEvent::Added(pool.clone()),
            PoolEvent::updated(pool.clone(), pool.clone().with_disks(["/tmp/img3.img"])),
        ] {
            assert_eq!(
                h.controller.handle_event(event).await.unwrap(),
                Outcome::Ignored
            );
        }

        assert!(h.runner.calls().is_empty());
        let stored = h.store.get("pool2").await.unwrap();
        assert_eq!(stored.status.phase, None);
        assert_eq!(
            stored.metadata.resource_version,
            pool.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_status_only_update_is_ignored() {
        let h = harness("abc");
        let pool = h.store.create(&pool1()).await.unwrap();

        let outcome = h
            .controller
            .handle_event(PoolEvent::updated(
                pool.clone(),
                pool.clone().with_phase(PoolPhase::Online),
            ))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Ignored);
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pool_marks_error_without_commands() {
        let h = harness("abc");
        let pool = h
            .store
            .create(&CStorPool::new("pool1", "abc"))
            .await
            .unwrap();

        let err = h
            .controller
            .handle_event(PoolEvent::Added(pool))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RuntimeError(RuntimeError::EmptyDiskList)
        ));
        assert!(h.runner.calls().is_empty());
        assert_eq!(h.store.get("pool1").await.unwrap().phase(), PoolPhase::Error);
    }

    #[tokio::test]
    async fn test_create_failure_marks_error() {
        let h = harness("abc");
        let pool = h.store.create(&pool1()).await.unwrap();
        no_pool_to_import(&h.runner);
        h.runner
            .push("create", ScriptedResponse::fail(1, "no such device"));

        assert!(h
            .controller
            .handle_event(PoolEvent::Added(pool))
            .await
            .is_err());
        assert_eq!(h.store.get("pool1").await.unwrap().phase(), PoolPhase::Error);
    }

    #[tokio::test]
    async fn test_restart_recovery_refreshes_phase() {
        let h = harness("abc");
        let pool = h
            .store
            .create(&pool1().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        h.runner
            .push("list", ScriptedResponse::fail(1, "cannot open 'cstor-abc': no such pool"))
            .push("status", ScriptedResponse::ok("  pool: cstor-abc\n state: FAULTED\n"));

        h.controller
            .handle_event(PoolEvent::Added(pool))
            .await
            .unwrap();

        assert_eq!(h.runner.subcommands(), vec!["list", "import", "status"]);
        assert_eq!(
            h.store.get("pool1").await.unwrap().phase(),
            PoolPhase::Offline
        );
    }

    #[tokio::test]
    async fn test_requeue_of_missing_resource_is_done() {
        let h = harness("abc");
        h.controller
            .handle_event(PoolEvent::Requeue("ghost".to_string()))
            .await
            .unwrap();
        assert!(h.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_requeues_until_success() {
        let h = harness("abc");
        let pool = h.store.create(&pool1()).await.unwrap();
        // First attempt: import fails outright, second attempt succeeds
        h.runner
            .push("import", ScriptedResponse::fail(1, "I/O error"));

        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let handle = tokio::spawn(h.controller.clone().run(rx, tx.clone(), token.clone()));
        tx.send(PoolEvent::Added(pool)).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if h.store.get("pool1").await.unwrap().phase() == PoolPhase::Online {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "never recovered");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        token.cancel();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(h.runner.calls_for("import").len(), 2);
    }

    async fn wait_for_failures(controller: &PoolController, name: &str, want: u32) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let failures = controller.failures(name).await;
            if failures == want {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} failures, have {}",
                want,
                failures
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_status_echo_keeps_backoff_growing() {
        // Long enough that scheduled requeues never fire during the test
        let h = harness_with_backoff("abc", Duration::from_secs(3600), Duration::from_secs(3600));
        h.store
            .create(&pool1().with_phase(PoolPhase::Online))
            .await
            .unwrap();
        h.store.delete("pool1").await.unwrap();
        h.runner
            .set_default("destroy", ScriptedResponse::fail(1, "pool is busy"));

        let mut watcher = PoolWatcher::new(Arc::new(h.store.clone()), Duration::from_secs(1));
        let (tx, rx) = mpsc::channel(16);
        let token = CancellationToken::new();
        let handle = tokio::spawn(h.controller.clone().run(rx, tx.clone(), token.clone()));

        for event in watcher.poll_once().await.unwrap() {
            tx.send(event).await.unwrap();
        }
        wait_for_failures(&h.controller, "pool1", 1).await;

        // The controller's own Deleting/Error writes come back as an update
        let echo = watcher.poll_once().await.unwrap();
        assert!(matches!(echo.as_slice(), [PoolEvent::Updated { .. }]));
        for event in echo {
            tx.send(event).await.unwrap();
        }
        tx.send(PoolEvent::Requeue("pool1".to_string())).await.unwrap();
        wait_for_failures(&h.controller, "pool1", 2).await;

        // Retrying from Error writes nothing, so there is nothing to echo
        assert!(watcher.poll_once().await.unwrap().is_empty());
        tx.send(PoolEvent::Requeue("pool1".to_string())).await.unwrap();
        wait_for_failures(&h.controller, "pool1", 3).await;

        let stored = h.store.get("pool1").await.unwrap();
        assert_eq!(stored.phase(), PoolPhase::Error);
        assert!(stored.has_finalizer(POOL_FINALIZER));
        assert_eq!(h.runner.calls_for("destroy").len(), 3);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(3), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_waits_for_zrepl_and_gives_up() {
        let h = harness("abc");
        h.runner
            .set_default("status", ScriptedResponse::fail(1, "failed to connect"));
        let pools = Arc::new(PoolManager::new(
            Arc::new(h.runner.clone()),
            PoolManagerConfig::default(),
        ));
        let zrepl = Arc::new(ZreplMonitor::new(
            pools.clone(),
            ZreplMonitorConfig {
                initial_interval: Duration::from_millis(10),
                max_interval: Duration::from_millis(20),
                timeout: Some(Duration::from_millis(100)),
            },
        ));
        let controller = Arc::new(
            PoolController::new(
                pools,
                Arc::new(h.store.clone()),
                PoolControllerConfig::new("abc"),
            )
            .with_zrepl(zrepl),
        );

        let (tx, rx) = mpsc::channel(1);
        let err = controller
            .run(rx, tx, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControllerError::RuntimeError(RuntimeError::DependencyTimeout { .. })
        ));
        assert!(h.runner.calls().iter().all(|c| c.subcommand() == Some("status")));
    }
}
