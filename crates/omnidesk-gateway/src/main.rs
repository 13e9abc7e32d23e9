//! Gateway binary.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use omnidesk_channels::ChannelManager;
use omnidesk_core::config::Config;
use omnidesk_core::hooks::NullHook;
use omnidesk_core::storage::LocalStore;

use omnidesk_gateway::{AppState, WsBroadcaster, serve};

#[derive(Debug, Parser)]
#[command(name = "omnidesk-gateway", about = "Omnidesk webhook gateway")]
struct Args {
    /// Path to the JSON5 config file; defaults to the state directory.
    #[arg(long, env = "OMNIDESK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Override the port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    if let Some(bind) = args.bind {
        config.gateway.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let store = Arc::new(LocalStore::open(&config.data_dir())?);
    let broadcaster = WsBroadcaster::new();
    let manager = Arc::new(ChannelManager::new(
        store,
        Arc::new(broadcaster.clone()),
        Arc::new(NullHook),
    ));

    // Periodic webchat session eviction (the registry is process-local
    // and would otherwise grow for the life of the process).
    let sessions = manager.sessions().clone();
    let ttl = chrono::Duration::minutes(config.sessions.ttl_minutes);
    let sweep_every =
        std::time::Duration::from_secs(config.sessions.sweep_interval_minutes * 60);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sessions.evict_idle(ttl).await;
        }
    });

    let state = Arc::new(AppState::new(manager, broadcaster, config));
    serve(state).await?;
    Ok(())
}
