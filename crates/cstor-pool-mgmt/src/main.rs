use clap::{Parser, ValueEnum};
use cstor_controller::{ApiPoolStore, PoolController, PoolControllerConfig, PoolStore, PoolWatcher};
use cstor_runtime::{PoolManager, PoolManagerConfig, ProcessRunner, ZreplMonitor, ZreplMonitorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "cstor-pool-mgmt",
    about = "Node-local agent that keeps this node's cStor pool in line with its CStorPool resource"
)]
struct Cli {
    /// Identity token of this node; only CStorPools with this UID are managed
    #[arg(long, env = "cstorid")]
    cstor_id: String,

    /// Base URL of the resource API server
    #[arg(long, env = "CSTOR_API_URL", default_value = "http://127.0.0.1:6443")]
    api_url: String,

    /// Pool toolchain binary
    #[arg(long, default_value = "zpool")]
    zpool_bin: String,

    /// Upper bound for a single pool command, in seconds (0 = unbounded)
    #[arg(long, default_value_t = 120)]
    command_timeout_secs: u64,

    /// How long to wait for the replication service at startup (0 = until shutdown)
    #[arg(long, default_value_t = 300)]
    zrepl_timeout_secs: u64,

    /// How often to list CStorPools from the API server, in seconds
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if cli.cstor_id.trim().is_empty() {
        return Err(miette::miette!(
            "Node identity is empty; set --cstor-id or the cstorid environment variable"
        ));
    }

    run_agent(cli).await
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// A zero timeout leaves pool commands unbounded
fn command_runner(timeout_secs: u64) -> ProcessRunner {
    match timeout_secs {
        0 => ProcessRunner::new(),
        secs => ProcessRunner::with_timeout(Duration::from_secs(secs)),
    }
}

/// Wire the pool layer, store, watcher and controller together and run
/// until ctrl-c or until the controller stops on its own
async fn run_agent(cli: Cli) -> miette::Result<()> {
    info!("Starting cstor-pool-mgmt for node '{}'", cli.cstor_id);

    let runner = Arc::new(command_runner(cli.command_timeout_secs));
    let pools = Arc::new(PoolManager::new(
        runner,
        PoolManagerConfig {
            zpool_bin: cli.zpool_bin.clone(),
        },
    ));

    let zrepl = Arc::new(ZreplMonitor::new(
        pools.clone(),
        ZreplMonitorConfig {
            timeout: (cli.zrepl_timeout_secs > 0)
                .then(|| Duration::from_secs(cli.zrepl_timeout_secs)),
            ..Default::default()
        },
    ));

    let store: Arc<dyn PoolStore> = Arc::new(ApiPoolStore::new(&cli.api_url));
    let token = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(256);

    // 1. Spawn watcher
    let watcher = PoolWatcher::new(store.clone(), Duration::from_secs(cli.poll_interval_secs));
    let watcher_handle = tokio::spawn(watcher.run(event_tx.clone(), token.clone()));

    // 2. Spawn controller
    let controller = Arc::new(
        PoolController::new(pools, store, PoolControllerConfig::new(cli.cstor_id.clone()))
            .with_zrepl(zrepl),
    );
    let controller_token = token.clone();
    let mut controller_handle =
        tokio::spawn(async move { controller.run(event_rx, event_tx, controller_token).await });

    info!("All components started, API server at {}", cli.api_url);

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;
            info!("Shutting down gracefully...");
            Ok(())
        }
        joined = &mut controller_handle => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Pool controller error: {}", e);
                Err(miette::Report::new(e))
            }
            Err(e) => Err(miette::miette!("Pool controller task failed: {}", e)),
        },
    };

    token.cancel();

    let shutdown_timeout = Duration::from_secs(5);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = watcher_handle.await;
        if !controller_handle.is_finished() {
            let _ = controller_handle.await;
        }
    })
    .await;

    info!("Shutdown complete");
    outcome
}
