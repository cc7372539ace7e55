use linkwatch::transport::TcpConnector;
use linkwatch::{
    ConnectionManager, DialConfig, DialStrategy, FramedChannel, ManagerConfig, ProgressLevel,
    SerialContext,
};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_PEERS: &str = "127.0.0.1:8080";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ManagerConfig::from_env()?;
    let peers = std::env::var("LINKWATCH_PEERS").unwrap_or_else(|_| DEFAULT_PEERS.to_string());
    let candidates: Vec<TcpConnector> = peers
        .split(',')
        .map(str::trim)
        .filter(|addr| !addr.is_empty())
        .map(|addr| TcpConnector::new(addr, CONNECT_TIMEOUT))
        .collect();

    info!("linkwatch starting");
    info!("  Peers: {}", peers);
    info!("  Tick: {:?}", config.tick_interval);
    info!(
        "  Watchdog: enabled={} timeout={:?} retry={:?} tries={}",
        config.watchdog.enabled,
        config.watchdog.timeout,
        config.watchdog.retry_timeout,
        config.watchdog.max_tries
    );

    let (channel, mut inbound) = FramedChannel::new(64);
    let strategy = DialStrategy::new(channel.clone(), candidates, DialConfig::default());
    let events = SerialContext::new("linkwatch-events")?;

    let manager = ConnectionManager::builder()
        .config(config)
        .channel(Arc::new(channel.clone()))
        .strategy(Arc::new(strategy))
        .execution_context(Arc::new(events))
        .build()?;

    manager.events().on_connection_found(|| info!("[MAIN] Connection found"));
    manager
        .events()
        .on_connection_timeout(|| warn!("[MAIN] Peer stopped answering"));
    manager.events().on_progress(|level, message| match level {
        ProgressLevel::Debug => debug!("[MAIN] {}", message),
        ProgressLevel::Info => info!("[MAIN] {}", message),
        ProgressLevel::Warning => warn!("[MAIN] {}", message),
        ProgressLevel::Error => error!("[MAIN] {}", message),
    });

    // Application traffic has no subscriber and lands here
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            info!("[MAIN] Inbound frame seq={} kind={:?}", frame.sequence_id, frame.kind());
        }
    });

    manager.start()?;
    if manager.config().use_fixed_port {
        manager.start_connect();
    } else {
        manager.start_scan();
    }

    tokio::signal::ctrl_c().await?;
    info!("[MAIN] Shutting down");

    if !manager.disconnect().await {
        warn!("[MAIN] Transport did not close cleanly");
    }
    manager.shutdown().await;
    Ok(())
}
