use anyhow::{Context, Result};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

use judiguard::bot::moderation::{ActionDispatcher, DecisionPolicy};
use judiguard::bot::shutdown::{GracefulShutdown, ShutdownConfig, ShutdownIntegration};
use judiguard::bot::ModerationBot;
use judiguard::classifier::ModelStore;
use judiguard::config::ConfigurationManager;
use judiguard::platforms::telegram::{TelegramConfig, TelegramConnection};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting JudiGuard v{}", judiguard::VERSION);

    // Configuration
    let config_manager = ConfigurationManager::new("config");
    if let Err(e) = config_manager.initialize().await {
        error!("Failed to initialize configuration: {:#}", e);
        return Err(e);
    }
    let config = config_manager.get_bot_config().await;
    info!(
        "Loaded {} from {} (threshold {:.2}, model dir {})",
        config.core.bot_name,
        config_manager.config_path().display(),
        config.moderation.threshold,
        config.model.model_dir.display()
    );

    // Model artifacts; nothing is served if they are unusable
    let policy = DecisionPolicy::new(config.moderation.threshold)?;
    let store = ModelStore::new(config.model.clone());
    let pipeline = match store.load_pipeline(policy) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to load classifier from {}: {:#}", config.model.model_dir.display(), e);
            return Err(e.context("Model store unusable, refusing to start"));
        }
    };
    info!("Classification pipeline ready (sequence length {})", pipeline.max_len());

    // Telegram gateway
    let telegram_config = TelegramConfig::from_env(&config.telegram)
        .context("Telegram configuration incomplete, set BOT_TOKEN in the environment or .env")?;
    let gateway = TelegramConnection::new(telegram_config);

    // Bot core and graceful shutdown
    // The bot component drains buffered messages and then stops the poller, so it gets
    // the drain budget plus room for the final Bot API calls
    let drain_seconds = config.performance.shutdown_timeout_seconds;
    let shutdown_manager = Arc::new(GracefulShutdown::new(ShutdownConfig {
        graceful_timeout_seconds: drain_seconds,
        component_timeout_seconds: drain_seconds + 30,
        max_operations: config.performance.max_concurrent_messages,
    }));

    let dispatcher = ActionDispatcher::from_settings(&config.moderation);
    if !config.moderation.notify_on_delete {
        warn!("Deletion notices disabled, spam will be removed silently");
    }

    let bot = ModerationBot::new(Box::new(gateway), pipeline, dispatcher, Arc::clone(&shutdown_manager))
        .with_stats_interval(Duration::from_secs(config.performance.stats_interval_seconds))
        .with_drain_timeout(Duration::from_secs(drain_seconds));
    let bot = Arc::new(RwLock::new(bot));

    bot.write().await.start().await?;
    ShutdownIntegration::setup(Arc::clone(&bot), &shutdown_manager).await;

    info!("JudiGuard is watching for gambling spam, press Ctrl+C to stop");

    if let Err(e) = shutdown_manager.wait_for_shutdown().await {
        error!("Error during graceful shutdown: {}", e);
    }

    let shutdown_stats = shutdown_manager.get_stats().await;
    if let Some(duration) = shutdown_stats.duration_seconds {
        info!("Shutdown completed in {:.2} seconds", duration);
    }
    if !shutdown_stats.failed_components.is_empty() {
        warn!("Components failed to shut down: {:?}", shutdown_stats.failed_components);
    }
    if shutdown_stats.forced_termination {
        warn!("In-flight messages were abandoned at shutdown");
    }

    info!("JudiGuard shutdown complete");
    Ok(())
}
