//! musterd — the muster cluster manager daemon.
//!
//! Serves the MCMP receiver and the status console from one listener,
//! keeps the shared registry, and runs the watchdog that syncs the
//! worker table off the version counter and reaps tombstoned nodes.
//!
//! # Usage
//!
//! ```text
//! musterd --listen 0.0.0.0:6666
//! musterd --config musterd.toml --persist --base-path /var/lib/muster
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use muster_console::{console_router, ConsoleState};
use muster_mcmp::{build_receiver, ManagerState};
use muster_proxy::{ProxyWorkerTable, RegistrySync};
use muster_registry::{snapshot, Registry};

use config::ManagerConfig;

#[derive(Parser)]
#[command(name = "musterd", about = "muster cluster manager daemon")]
struct Cli {
    /// Listen address (host:port).
    #[arg(long)]
    listen: Option<String>,

    /// Configuration file (TOML).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Persist table snapshots across restarts.
    #[arg(long)]
    persist: bool,

    /// Base directory for table snapshots.
    #[arg(long)]
    base_path: Option<PathBuf>,

    /// Max number of nodes.
    #[arg(long)]
    max_node: Option<usize>,

    /// Max number of virtual-host aliases.
    #[arg(long)]
    max_host: Option<usize>,

    /// Max number of contexts.
    #[arg(long)]
    max_context: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,musterd=debug,muster=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };
    if cli.listen.is_some() {
        config.listen = cli.listen.clone();
    }
    if cli.persist {
        config.persist = Some(true);
    }
    if cli.base_path.is_some() {
        config.base_path = cli.base_path.clone();
    }
    if cli.max_node.is_some() {
        config.max_node = cli.max_node;
    }
    if cli.max_host.is_some() {
        config.max_host = cli.max_host;
    }
    if cli.max_context.is_some() {
        config.max_context = cli.max_context;
    }

    run(config).await
}

async fn run(config: ManagerConfig) -> anyhow::Result<()> {
    info!("muster manager starting");

    // ── Registry and worker plane ──────────────────────────────────

    let sizes = config.table_sizes();
    let registry = Registry::new(sizes);
    let persist = config.persist();
    let base_path = config.base_path();
    if persist {
        std::fs::create_dir_all(&base_path)?;
        snapshot::load(&registry, &base_path)?;
        info!(base = %base_path.display(), "table snapshots loaded");
    }

    let workers = ProxyWorkerTable::new(sizes.nodes);
    let state = ManagerState::new(registry.clone(), Arc::new(workers.clone()), config.manager_settings());
    info!(
        nodes = sizes.nodes,
        hosts = sizes.hosts,
        contexts = sizes.contexts,
        "registry initialized"
    );

    // Bring the worker table in line with a loaded snapshot.
    let registry_sync = Arc::new(RegistrySync::new());
    registry_sync.sync(&registry, &workers);

    // ── Routers ────────────────────────────────────────────────────

    let console = ConsoleState::new(state.clone(), config.console_settings());
    info!(nonce = %console.nonce, path = config.console_path(), "console ready");

    let router = axum::Router::new()
        .nest(config.console_path(), console_router(console))
        .merge(build_receiver(state));

    // ── Watchdog ───────────────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watchdog_handle = tokio::spawn(watchdog_loop(
        registry.clone(),
        workers.clone(),
        registry_sync,
        persist.then(|| base_path.clone()),
        Duration::from_secs(config.watchdog_secs()),
        shutdown_rx,
    ));

    // ── Serve ──────────────────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(config.listen()).await?;
    info!(addr = %listener.local_addr()?, "MCMP receiver listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = watchdog_handle.await;

    if persist {
        snapshot::store(&registry, &base_path)?;
        info!(base = %base_path.display(), "table snapshots stored");
    }
    info!("muster manager stopped");
    Ok(())
}

/// Periodic maintenance: rebuild the worker table when the version
/// counter moved, advance the tombstone reaper, refresh snapshots.
async fn watchdog_loop(
    registry: Registry,
    workers: ProxyWorkerTable,
    sync: Arc<RegistrySync>,
    snapshot_base: Option<PathBuf>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {
                let mut synced = sync.sync_if_stale(&registry, &workers).is_some();

                let freed = {
                    let mut guard = registry.lock_nodes();
                    guard.reap_removed_nodes()
                };
                if !freed.is_empty() {
                    info!(slots = ?freed, "freed tombstoned nodes");
                    synced |= sync.sync_if_stale(&registry, &workers).is_some();
                }

                if synced {
                    if let Some(base) = &snapshot_base {
                        if let Err(e) = snapshot::store(&registry, base) {
                            warn!(error = %e, "snapshot refresh failed");
                        }
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
