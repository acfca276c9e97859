//! powchain - Main Application
//!
//! Runs a single mining node: pooled transactions are sealed into
//! proof-of-work blocks until interrupted.

use powchain::{
    block::BlockAssembler,
    config::{Config, LogFormat},
    network::ChannelBroadcaster,
    pool::MemoryPool,
    store::{BlockStore, JsonFileStore, MemoryStore},
    utils::format_duration,
    worker::CpuWorker,
    MiningNode, Result, APP_DESCRIPTION, APP_NAME, APP_VERSION,
};

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().await?;

    init_logging(&config);

    if config.info {
        print_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    let settings = config.node_settings()?;
    let worker = CpuWorker::new(config.workers);
    info!(
        "Configuration: workers={}, difficulty={}, timeout={:?}, store={}",
        worker.worker_count(),
        settings.difficulty,
        settings.mining_timeout,
        config
            .data_dir
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| "memory".to_string())
    );

    let store: Arc<dyn BlockStore> = match &config.data_dir {
        Some(dir) => Arc::new(JsonFileStore::open(dir).await?),
        None => Arc::new(MemoryStore::new()),
    };

    let network = Arc::new(ChannelBroadcaster::default());
    let mut announcements = network.subscribe();
    tokio::spawn(async move {
        while let Ok(block) = announcements.recv().await {
            debug!("Announced block {} {}", block.index, block.hash);
        }
    });

    let assembler = BlockAssembler::new(worker, config.miner_id()?);
    let mut node = MiningNode::open(
        settings,
        assembler,
        Arc::new(MemoryPool::new()),
        store,
        network,
    )
    .await?;

    let cancellation = CancellationToken::new();
    let shutdown = cancellation.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
    });

    let started = Instant::now();
    node.run(cancellation).await?;

    info!(
        "Sealed {} blocks in {} (height {})",
        node.sealed(),
        format_duration(started.elapsed().as_secs()),
        node.chain().height()
    );

    Ok(())
}

/// Install the tracing subscriber; `RUST_LOG` overrides the configured level
fn init_logging(config: &Config) {
    let level = tracing::Level::from(config.log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    match config.log_format {
        LogFormat::Plain => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init(),
    }
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("{}", APP_DESCRIPTION);
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
