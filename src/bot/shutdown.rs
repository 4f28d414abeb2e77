// src/bot/shutdown.rs - Graceful shutdown management

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{broadcast, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{sleep, timeout};

/// Shutdown phases for orderly termination
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownPhase {
    /// Normal operation
    Running,
    /// Stop accepting new messages but finish the ones in flight
    Draining,
    /// Disconnect components
    Terminating,
    /// Shutdown complete
    Stopped,
}

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for in-flight messages before forcing termination
    pub graceful_timeout_seconds: u64,
    /// Time to wait for individual components to shut down
    pub component_timeout_seconds: u64,
    /// Number of messages that may be processed at once
    pub max_operations: usize,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            graceful_timeout_seconds: 30,
            component_timeout_seconds: 10,
            max_operations: 16,
        }
    }
}

/// Statistics about the shutdown process
#[derive(Debug, Clone, Default)]
pub struct ShutdownStats {
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_seconds: Option<f64>,
    pub components_shutdown: Vec<String>,
    pub failed_components: Vec<(String, String)>, // (component, error)
    pub forced_termination: bool,
}

/// Component that can be gracefully shut down
#[async_trait::async_trait]
pub trait ShutdownComponent: Send + Sync {
    /// Component name for logging
    fn name(&self) -> &str;

    async fn shutdown(&self) -> Result<()>;
}

/// Main graceful shutdown manager
pub struct GracefulShutdown {
    config: ShutdownConfig,
    phase: Arc<RwLock<ShutdownPhase>>,
    stats: Arc<RwLock<ShutdownStats>>,
    shutdown_notifier: broadcast::Sender<ShutdownPhase>,
    components: Arc<RwLock<Vec<Box<dyn ShutdownComponent>>>>,
    active_operations: Arc<Semaphore>,
    is_shutdown_requested: Arc<RwLock<bool>>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);
        let max_operations = config.max_operations.max(1);

        Self {
            config,
            phase: Arc::new(RwLock::new(ShutdownPhase::Running)),
            stats: Arc::new(RwLock::new(ShutdownStats::default())),
            shutdown_notifier: shutdown_tx,
            components: Arc::new(RwLock::new(Vec::new())),
            active_operations: Arc::new(Semaphore::new(max_operations)),
            is_shutdown_requested: Arc::new(RwLock::new(false)),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Register a component for graceful shutdown
    pub async fn register_component(&self, component: Box<dyn ShutdownComponent>) {
        let name = component.name().to_string();
        self.components.write().await.push(component);
        debug!("Registered shutdown component: {}", name);
    }

    /// Start listening for shutdown signals
    pub async fn start_signal_handlers(&self) {
        let phase_sigint = Arc::clone(&self.phase);
        let notifier_sigint = self.shutdown_notifier.clone();
        let shutdown_requested_sigint = Arc::clone(&self.is_shutdown_requested);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C signal, initiating graceful shutdown...");
                    *shutdown_requested_sigint.write().await = true;
                    *phase_sigint.write().await = ShutdownPhase::Draining;
                    let _ = notifier_sigint.send(ShutdownPhase::Draining);
                }
                Err(err) => {
                    error!("Failed to listen for Ctrl+C signal: {}", err);
                }
            }
        });

        // Handle SIGTERM (systemd, docker stop, etc.)
        #[cfg(unix)]
        {
            let phase_sigterm = Arc::clone(&self.phase);
            let notifier_sigterm = self.shutdown_notifier.clone();
            let shutdown_requested_sigterm = Arc::clone(&self.is_shutdown_requested);

            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(err) => {
                        error!("Failed to register SIGTERM handler: {}", err);
                        return;
                    }
                };

                sigterm.recv().await;
                info!("Received SIGTERM signal, initiating graceful shutdown...");
                *shutdown_requested_sigterm.write().await = true;
                *phase_sigterm.write().await = ShutdownPhase::Draining;
                let _ = notifier_sigterm.send(ShutdownPhase::Draining);
            });
        }

        info!("Shutdown signal handlers started");
    }

    /// Wait for shutdown signal and perform graceful shutdown
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        info!("Waiting for shutdown signal...");

        loop {
            if *self.is_shutdown_requested.read().await {
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }

        info!("Shutdown requested, beginning graceful shutdown process...");
        self.perform_shutdown().await
    }

    /// Drain in-flight messages, shut components down, report
    pub async fn perform_shutdown(&self) -> Result<()> {
        let start_time = chrono::Utc::now();
        self.stats.write().await.started_at = Some(start_time);

        // Phase 1: Draining - stop taking messages
        info!("Phase 1: Draining - waiting for in-flight messages...");
        *self.phase.write().await = ShutdownPhase::Draining;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Draining);

        let drain_timeout = Duration::from_secs(self.config.graceful_timeout_seconds);
        match timeout(drain_timeout, self.wait_for_operations_completion()).await {
            Ok(()) => info!("All in-flight messages completed"),
            Err(_) => {
                warn!("Timeout waiting for in-flight messages, proceeding with shutdown");
                self.stats.write().await.forced_termination = true;
            }
        }

        // Phase 2: Terminating - shut components down
        info!("Phase 2: Terminating - shutting down components...");
        *self.phase.write().await = ShutdownPhase::Terminating;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Terminating);

        self.shutdown_all_components().await;

        let end_time = chrono::Utc::now();
        let duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        {
            let mut stats = self.stats.write().await;
            stats.completed_at = Some(end_time);
            stats.duration_seconds = Some(duration);
        }

        *self.phase.write().await = ShutdownPhase::Stopped;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Stopped);

        info!("Graceful shutdown completed in {:.2} seconds", duration);
        Ok(())
    }

    /// Acquiring every permit means nothing is running
    async fn wait_for_operations_completion(&self) {
        let max_permits = self.config.max_operations.max(1) as u32;
        match self.active_operations.acquire_many(max_permits).await {
            Ok(_permits) => debug!("All active operations have completed"),
            Err(e) => warn!("Operation semaphore closed while draining: {}", e),
        }
    }

    async fn shutdown_all_components(&self) {
        let components = self.components.read().await;
        let component_timeout = Duration::from_secs(self.config.component_timeout_seconds);

        info!("Shutting down {} components...", components.len());

        for component in components.iter() {
            let component_name = component.name().to_string();
            info!("Shutting down component: {}", component_name);

            match timeout(component_timeout, component.shutdown()).await {
                Ok(Ok(())) => {
                    info!("Component '{}' shut down gracefully", component_name);
                    self.stats.write().await.components_shutdown.push(component_name);
                }
                Ok(Err(e)) => {
                    error!("Component '{}' failed to shutdown gracefully: {}", component_name, e);
                    self.stats
                        .write()
                        .await
                        .failed_components
                        .push((component_name, e.to_string()));
                }
                Err(_) => {
                    error!("Component '{}' shutdown timed out", component_name);
                    self.stats
                        .write()
                        .await
                        .failed_components
                        .push((component_name, "Shutdown timeout".to_string()));
                }
            }
        }
    }

    /// Get current shutdown phase
    pub async fn get_phase(&self) -> ShutdownPhase {
        self.phase.read().await.clone()
    }

    /// Get shutdown statistics
    pub async fn get_stats(&self) -> ShutdownStats {
        self.stats.read().await.clone()
    }

    /// Check if shutdown has been requested
    pub async fn is_shutdown_requested(&self) -> bool {
        *self.is_shutdown_requested.read().await
    }

    /// Subscribe to shutdown phase changes
    pub fn subscribe_to_shutdown(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.shutdown_notifier.subscribe()
    }

    /// Manually trigger shutdown (for testing or programmatic shutdown)
    pub async fn trigger_shutdown(&self) {
        info!("Shutdown manually triggered");
        *self.is_shutdown_requested.write().await = true;
        *self.phase.write().await = ShutdownPhase::Draining;
        let _ = self.shutdown_notifier.send(ShutdownPhase::Draining);
    }

    /// Permit for one message; waits while all slots are busy, `None` once shutdown began
    pub async fn acquire_operation_permit(&self) -> Option<OwnedSemaphorePermit> {
        if *self.phase.read().await == ShutdownPhase::Running {
            Arc::clone(&self.active_operations).acquire_owned().await.ok()
        } else {
            None
        }
    }
}

/// Shutdown component for the moderation bot
pub struct ModerationBotShutdownComponent {
    bot: Arc<RwLock<crate::bot::ModerationBot>>,
}

impl ModerationBotShutdownComponent {
    pub fn new(bot: Arc<RwLock<crate::bot::ModerationBot>>) -> Self {
        Self { bot }
    }
}

#[async_trait::async_trait]
impl ShutdownComponent for ModerationBotShutdownComponent {
    fn name(&self) -> &str {
        "ModerationBot"
    }

    async fn shutdown(&self) -> Result<()> {
        let mut bot = self.bot.write().await;
        bot.shutdown().await
    }
}

pub struct ShutdownIntegration;

impl ShutdownIntegration {
    /// Register the bot with the shutdown manager and listen for signals
    pub async fn setup(bot: Arc<RwLock<crate::bot::ModerationBot>>, shutdown_manager: &GracefulShutdown) {
        shutdown_manager
            .register_component(Box::new(ModerationBotShutdownComponent::new(bot)))
            .await;
        shutdown_manager.start_signal_handlers().await;
        info!("Graceful shutdown system configured");
    }
}
