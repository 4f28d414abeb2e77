use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;

use crate::classifier::ClassificationPipeline;
use crate::platforms::MessagingGateway;
use crate::types::{ActionOutcome, RawMessage};

pub mod analytics;
pub mod moderation;
pub mod shutdown;

use analytics::ModerationStats;
use moderation::ActionDispatcher;
use shutdown::{GracefulShutdown, ShutdownPhase};

const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one message handler needs; cheap to clone per message
#[derive(Clone)]
struct MessageContext {
    pipeline: ClassificationPipeline,
    dispatcher: Arc<ActionDispatcher>,
    gateway: Arc<RwLock<Box<dyn MessagingGateway>>>,
    stats: Arc<ModerationStats>,
}

impl MessageContext {
    /// Classify one message and act on the decision
    async fn process(&self, message: RawMessage) -> ActionOutcome {
        self.stats.record_received(&message).await;
        debug!("Message {} from {}: {}", message.message_id, message.origin(), message.text);

        // CPU-bound, keep it off the async workers
        let pipeline = self.pipeline.clone();
        let text = message.text.clone();
        let classification = match tokio::task::spawn_blocking(move || pipeline.classify(&text)).await {
            Ok(Ok(classification)) => classification,
            Ok(Err(e)) => {
                error!(
                    "Classification failed for message {} in chat {}, leaving it alone: {:#}",
                    message.message_id, message.chat_id, e
                );
                self.stats.record_classification_error();
                return ActionOutcome::Failed { reason: e.to_string() };
            }
            Err(e) => {
                error!("Classification task for message {} aborted: {}", message.message_id, e);
                self.stats.record_classification_error();
                return ActionOutcome::Failed { reason: e.to_string() };
            }
        };

        info!(
            "Message {} in chat {} scored {} -> {:?}",
            message.message_id, message.chat_id, classification.score, classification.decision
        );
        self.stats
            .record_classification(message.chat_id, classification.score.value(), classification.decision)
            .await;

        let outcome = {
            let gateway = self.gateway.read().await;
            self.dispatcher
                .act(classification.decision, &message, classification.score, &**gateway)
                .await
        };
        self.stats.record_outcome(message.chat_id, &outcome).await;
        outcome
    }
}

/// Moderation engine: gateway in, classification pipeline, moderation actions out
pub struct ModerationBot {
    context: MessageContext,
    shutdown: Arc<GracefulShutdown>,
    stats_interval: Duration,
    drain_timeout: Duration,
    dispatch_handle: Option<JoinHandle<()>>,
    reporter_handle: Option<JoinHandle<()>>,
}

impl ModerationBot {
    pub fn new(
        gateway: Box<dyn MessagingGateway>,
        pipeline: ClassificationPipeline,
        dispatcher: ActionDispatcher,
        shutdown: Arc<GracefulShutdown>,
    ) -> Self {
        Self {
            context: MessageContext {
                pipeline,
                dispatcher: Arc::new(dispatcher),
                gateway: Arc::new(RwLock::new(gateway)),
                stats: Arc::new(ModerationStats::new()),
            },
            shutdown,
            stats_interval: Duration::ZERO,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            dispatch_handle: None,
            reporter_handle: None,
        }
    }

    /// Log statistics every `interval`; zero disables the periodic log
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Upper bound for handling buffered messages at shutdown
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn stats(&self) -> Arc<ModerationStats> {
        Arc::clone(&self.context.stats)
    }

    /// Connect the gateway and start the dispatch loop. Returns immediately.
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting moderation bot...");

        let receiver = {
            let mut gateway = self.context.gateway.write().await;
            let platform = gateway.platform_name().to_string();
            gateway
                .connect()
                .await
                .with_context(|| format!("Failed to connect to {}", platform))?;
            gateway
                .take_message_receiver()
                .with_context(|| format!("{} provided no message stream", platform))?
        };

        // Subscribe before spawning so an early shutdown is not missed
        let phase_receiver = self.shutdown.subscribe_to_shutdown();
        self.dispatch_handle = Some(tokio::spawn(Self::run_dispatch_loop(
            self.context.clone(),
            receiver,
            phase_receiver,
            Arc::clone(&self.shutdown),
        )));

        if !self.stats_interval.is_zero() {
            let reporter = Arc::clone(&self.context.stats)
                .spawn_reporter(self.stats_interval, self.shutdown.subscribe_to_shutdown());
            self.reporter_handle = Some(reporter);
        }

        info!("Moderation bot started successfully");
        Ok(())
    }

    async fn run_dispatch_loop(
        context: MessageContext,
        mut receiver: mpsc::Receiver<RawMessage>,
        mut phase_receiver: broadcast::Receiver<ShutdownPhase>,
        shutdown: Arc<GracefulShutdown>,
    ) {
        info!("Dispatch loop started");
        let mut in_flight = JoinSet::new();

        loop {
            let next = tokio::select! {
                next = receiver.recv() => next,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
                _ = phase_receiver.recv() => {
                    info!("Shutdown in progress, no longer taking new messages");
                    break;
                }
            };

            let Some(message) = next else {
                warn!("Gateway closed the message stream, shutting down");
                shutdown.trigger_shutdown().await;
                break;
            };

            // Waits while all slots are busy, which backpressures the gateway
            let Some(permit) = shutdown.acquire_operation_permit().await else {
                context.process(message).await;
                break;
            };

            let context = context.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                context.process(message).await;
            });
        }

        // The gateway has already fetched whatever is buffered; handle it before disconnecting
        receiver.close();
        let mut drained = 0usize;
        while let Some(message) = receiver.recv().await {
            context.process(message).await;
            drained += 1;
        }
        if drained > 0 {
            info!("Processed {} buffered messages during shutdown", drained);
        }
        while in_flight.join_next().await.is_some() {}

        info!("Dispatch loop stopped");
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down moderation bot...");

        if let Some(mut handle) = self.dispatch_handle.take() {
            match tokio::time::timeout(self.drain_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Dispatch loop ended abnormally: {}", e),
                Err(_) => {
                    warn!(
                        "Buffered messages not drained within {:?}, abandoning the rest",
                        self.drain_timeout
                    );
                    handle.abort();
                }
            }
        }

        {
            let mut gateway = self.context.gateway.write().await;
            let platform = gateway.platform_name().to_string();
            if let Err(e) = gateway.disconnect().await {
                error!("Error disconnecting from {}: {}", platform, e);
            }
        }

        if let Some(handle) = self.reporter_handle.take() {
            handle.abort();
        }
        self.context.stats.log_summary().await;

        info!("Moderation bot shutdown complete");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.context.gateway.read().await.is_connected().await
    }
}
