//! Jellyfin status board service entry point

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Mutex;
use tracing::{info, warn};

use jellyfin_status::config::Config;
use jellyfin_status::jobs::{self, StatusBoard};
use jellyfin_status::services::{
    ChannelResolver, ChatPlatform, DiscordClient, Inventory, InventorySource, JellyfinClient,
    MessageReconciler, MessageStore, ReportBuilder, init_tracing,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration errors abort before anything is contacted
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    init_tracing(config.log_format);

    info!(
        jellyfin = %config.jellyfin.base_url,
        guild_id = config.discord.guild_id,
        category = %config.discord.category_name,
        channel = %config.discord.channel_name,
        kind = %config.discord.channel_kind,
        interval_secs = config.cadence.interval.as_secs(),
        "Starting Jellyfin status board"
    );

    let jellyfin = JellyfinClient::new(&config.jellyfin)?;
    let inventory: Arc<dyn InventorySource> = Arc::new(Inventory::new(jellyfin, &config.jellyfin));
    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordClient::new(&config.discord)?);

    let board = StatusBoard::new(
        inventory,
        ReportBuilder::new(config.report.clone(), config.jellyfin.ignored_libraries.clone()),
        ChannelResolver::new(config.discord.destination()),
        platform,
        MessageReconciler::load(MessageStore::new(&config.state_path)),
        config.cycle_timeout,
    );
    let board = Arc::new(Mutex::new(board));

    // First cycle runs right away instead of waiting a full interval
    board.lock().await.run_cycle().await;

    let mut scheduler = jobs::start_scheduler(board.clone(), &config.cadence).await?;

    shutdown_signal().await?;
    info!("Shutdown requested");

    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Job scheduler did not stop cleanly");
    }
    // Let an in-flight cycle finish
    let _guard = board.lock().await;

    info!("Jellyfin status board stopped");
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    }
}
