//! `ringstore-server`: brings up the configured data keepers, the
//! background cleaner, and the HTTP surface, then runs until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ringstore::catalog::{Catalog, MemCatalog};
use ringstore::config::AppConfig;
use ringstore::node::LocalNode;
use ringstore::orchestrator::Orchestrator;
use ringstore::receiver::{cleaner, Receiver};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[clap(name = "ringstore-server", about = "Run a ringstore blob store node cluster")]
struct Cli {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = "/etc/ringstore/config.toml")]
    config: PathBuf,

    /// Where the catalog mirrors its state across restarts.
    #[clap(long, default_value = "/var/lib/ringstore/catalog.json")]
    catalog_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .await
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let orchestrator = Arc::new(Orchestrator::new());
    for node_cfg in &config.nodes {
        let node = LocalNode::new(node_cfg.id.clone(), node_cfg.path.clone(), node_cfg.capacity_bytes)
            .await
            .with_context(|| format!("bringing up node {}", node_cfg.id))?;
        orchestrator
            .add_data_keeper(node_cfg.id.clone(), Arc::new(node))
            .await
            .with_context(|| format!("joining node {} to the ring", node_cfg.id))?;
        info!("server: node {} online", node_cfg.id);
    }

    let catalog: Arc<dyn Catalog> = Arc::new(
        MemCatalog::open(&cli.catalog_path)
            .await
            .with_context(|| format!("opening catalog at {}", cli.catalog_path.display()))?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cleaner_handle = cleaner::spawn(
        orchestrator.clone(),
        catalog.clone(),
        config.cleaner_tick(),
        config.stale_after(),
        shutdown_rx,
    );

    let receiver = Arc::new(Receiver::new(orchestrator, catalog));
    let addr: std::net::SocketAddr = config
        .listen
        .parse()
        .with_context(|| format!("parsing listen address '{}'", config.listen))?;

    tokio::select! {
        result = ringstore::http::serve(addr, receiver) => {
            result.context("http server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("server: shutdown requested");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = cleaner_handle.await;

    Ok(())
}
