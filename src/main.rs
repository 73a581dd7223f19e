mod commands;
mod config;
mod format;
mod imgur;
mod platform;
mod queue;
mod relay;
mod scheduler;
#[cfg(test)]
mod testing;
mod tvmaze;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::CommandRouter;
use crate::config::Config;
use crate::imgur::ImgurClient;
use crate::platform::irc::IrcClient;
use crate::platform::telegram::TelegramClient;
use crate::relay::Relay;
use crate::scheduler::tasks::register_relay_tasks;
use crate::scheduler::Scheduler;
use crate::tvmaze::TvMazeClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  IRC: {}:{} as {}", config.irc.server, config.irc.port, config.irc.nick);
    info!("  Channel: {}", config.irc.channel);
    info!("  Telegram chat: {}", config.telegram.chat_id);
    info!("  Imgur retention: {:?} minutes", config.imgur.retention_minutes);

    let shutdown = CancellationToken::new();
    // Cancels everything on any early return
    let _guard = shutdown.clone().drop_guard();

    // IRC must be up before anything is relayed
    let irc = IrcClient::new(config.irc.clone(), shutdown.child_token());
    irc.connect(config.irc.connect_timeout())
        .await
        .with_context(|| format!("Failed to connect to IRC server {}", config.irc.server))?;
    irc.join(irc.home_channel()).await;

    let telegram = TelegramClient::new(config.telegram.clone(), shutdown.clone());
    let poller = telegram.spawn();

    let imgur = Arc::new(ImgurClient::new(config.imgur.clone()));
    let shows = Arc::new(TvMazeClient::new(config.tvmaze.clone()));
    let commands = Arc::new(CommandRouter::new(irc.clone(), telegram.clone(), shows));
    let relay = Relay::new(irc.clone(), telegram.clone(), imgur.clone(), commands);

    let mut scheduler = Scheduler::new().await?;
    register_relay_tasks(&mut scheduler, irc.clone(), telegram.clone(), imgur).await?;
    scheduler.start().await?;

    let relay_task = tokio::spawn(relay.run(shutdown.clone()));
    info!("Relay is running...");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    irc.quit("Relay shutting down").await;
    shutdown.cancel();

    if let Err(e) = relay_task.await {
        error!("Relay task failed: {}", e);
    }
    if let Err(e) = poller.await {
        error!("Telegram poller failed: {}", e);
    }
    scheduler.shutdown().await?;

    Ok(())
}
