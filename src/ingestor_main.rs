//! Token activity ingestor binary
//!
//! Wires the ingestion pipeline together: configuration, activity store,
//! RPC clients, token registry, definition store, change watchers, and the
//! coordinator. Shuts down gracefully on Ctrl+C, letting any in-flight
//! sweep finish its batch writes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tidelog::config::{parse_address, Config};
use tidelog::coordinator::{Coordinator, Signal};
use tidelog::registry::{InMemoryDefinitionStore, InMemoryTokenRegistry};
use tidelog::rpc::ChainClients;
use tidelog::store::RocksActivityStore;
use tidelog::watchers::{spawn_definition_watcher, spawn_token_set_watcher};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Token activity ingestor
#[derive(Parser)]
#[command(name = "ingestor")]
#[command(about = "Ingest on-chain events into token activity records")]
struct Args {
    /// Path to the configuration file (servers, intervals, caps)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the tracked tokens file (JSON array of {contract, chain_id})
    #[arg(short, long, default_value = "tokens.json")]
    tokens: PathBuf,

    /// Path to the event card definitions file
    #[arg(short = 'e', long, default_value = "definitions.json")]
    definitions: PathBuf,

    /// Wallet address events are filtered for (hex)
    #[arg(short, long)]
    wallet: String,

    /// Path to the RocksDB database directory
    #[arg(short = 'p', long, default_value = "./activity_db")]
    db_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let wallet = parse_address(&args.wallet).context("Invalid wallet address")?;

    info!("Starting token activity ingestor");
    info!("Config: {:?}", args.config);
    info!("Database: {:?}", args.db_path);
    info!("Wallet: 0x{:x}", wallet);

    let config = Arc::new(Config::load(&args.config)?);
    info!(
        servers = config.servers.len(),
        sweep_interval_secs = config.sweep_interval_secs,
        "Configuration loaded"
    );

    let store = Arc::new(
        RocksActivityStore::open(&args.db_path)
            .with_context(|| format!("Failed to open database at {:?}", args.db_path))?,
    );
    let chain = Arc::new(ChainClients::from_config(&config)?);
    let registry = Arc::new(
        InMemoryTokenRegistry::load(&args.tokens).context("Failed to load tracked tokens")?,
    );
    let definitions = Arc::new(
        InMemoryDefinitionStore::load(&args.definitions)
            .context("Failed to load event card definitions")?,
    );

    let (coordinator, rx) = Coordinator::new(
        chain,
        store,
        registry.clone(),
        definitions.clone(),
        Arc::clone(&config),
        wallet,
    );
    let sender = coordinator.signal_sender();

    // Wire the change watchers into the coordinator's signal queue.
    spawn_token_set_watcher(registry.subscribe(), sender.clone());
    spawn_definition_watcher(definitions.subscribe(), sender.clone());

    // Periodic trigger keeps the dataset fresh even without change events;
    // the poller coalesces and rate-limits the actual sweeps.
    {
        let sender = sender.clone();
        let interval = config.sweep_interval();
        tokio::spawn(async move {
            loop {
                if sender.send(Signal::Sweep).is_err() {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let run_handle = tokio::spawn(coordinator.run(rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down gracefully...");

    let _ = sender.send(Signal::Shutdown);
    run_handle
        .await
        .context("Coordinator task failed")?
        .context("Coordinator error")?;

    info!("Ingestor stopped");
    Ok(())
}
