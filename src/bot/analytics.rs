use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::bot::shutdown::ShutdownPhase;
use crate::types::{ActionOutcome, ChatId, Decision, RawMessage};

#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub title: Option<String>,
    pub messages_classified: u64,
    pub spam_detected: u64,
    pub messages_deleted: u64,
    pub warnings_sent: u64,
    pub actions_failed: u64,
    pub last_spam_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ChatStats {
    fn new(title: Option<String>) -> Self {
        Self {
            title,
            messages_classified: 0,
            spam_detected: 0,
            messages_deleted: 0,
            warnings_sent: 0,
            actions_failed: 0,
            last_spam_at: None,
        }
    }
}

/// Point-in-time copy of the counters, serializable for logs
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: i64,
    pub messages_received: u64,
    pub messages_classified: u64,
    pub spam_detected: u64,
    pub messages_deleted: u64,
    pub notices_posted: u64,
    pub warnings_sent: u64,
    pub actions_failed: u64,
    pub classification_errors: u64,
    pub mean_score: f64,
    pub chats: HashMap<i64, ChatStats>,
}

/// Process-wide moderation counters
pub struct ModerationStats {
    messages_received: AtomicU64,
    messages_classified: AtomicU64,
    spam_detected: AtomicU64,
    messages_deleted: AtomicU64,
    notices_posted: AtomicU64,
    warnings_sent: AtomicU64,
    actions_failed: AtomicU64,
    classification_errors: AtomicU64,
    /// Sum of scores in millionths, for the running mean
    score_micros: AtomicU64,
    chat_stats: Arc<RwLock<HashMap<ChatId, ChatStats>>>,
    start_time: chrono::DateTime<chrono::Utc>,
}

impl ModerationStats {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            messages_classified: AtomicU64::new(0),
            spam_detected: AtomicU64::new(0),
            messages_deleted: AtomicU64::new(0),
            notices_posted: AtomicU64::new(0),
            warnings_sent: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            classification_errors: AtomicU64::new(0),
            score_micros: AtomicU64::new(0),
            chat_stats: Arc::new(RwLock::new(HashMap::new())),
            start_time: chrono::Utc::now(),
        }
    }

    pub async fn record_received(&self, message: &RawMessage) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        let mut chats = self.chat_stats.write().await;
        let entry = chats
            .entry(message.chat_id)
            .or_insert_with(|| ChatStats::new(message.chat_title.clone()));
        if entry.title.is_none() {
            entry.title = message.chat_title.clone();
        }
    }

    pub async fn record_classification(&self, chat: ChatId, score: f32, decision: Decision) {
        self.messages_classified.fetch_add(1, Ordering::Relaxed);
        self.score_micros
            .fetch_add((score.clamp(0.0, 1.0) as f64 * 1_000_000.0) as u64, Ordering::Relaxed);

        let mut chats = self.chat_stats.write().await;
        let entry = chats.entry(chat).or_insert_with(|| ChatStats::new(None));
        entry.messages_classified += 1;
        if decision == Decision::Suppress {
            self.spam_detected.fetch_add(1, Ordering::Relaxed);
            entry.spam_detected += 1;
            entry.last_spam_at = Some(chrono::Utc::now());
        }
    }

    pub async fn record_outcome(&self, chat: ChatId, outcome: &ActionOutcome) {
        let mut chats = self.chat_stats.write().await;
        let entry = chats.entry(chat).or_insert_with(|| ChatStats::new(None));
        match outcome {
            ActionOutcome::Allowed => {}
            ActionOutcome::Deleted { notified } => {
                self.messages_deleted.fetch_add(1, Ordering::Relaxed);
                entry.messages_deleted += 1;
                if *notified {
                    self.notices_posted.fetch_add(1, Ordering::Relaxed);
                }
            }
            ActionOutcome::Warned => {
                self.warnings_sent.fetch_add(1, Ordering::Relaxed);
                entry.warnings_sent += 1;
            }
            ActionOutcome::Failed { .. } => {
                self.actions_failed.fetch_add(1, Ordering::Relaxed);
                entry.actions_failed += 1;
            }
        }
    }

    pub fn record_classification_error(&self) {
        self.classification_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let classified = self.messages_classified.load(Ordering::Relaxed);
        let mean_score = if classified == 0 {
            0.0
        } else {
            self.score_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0 / classified as f64
        };

        let chats = self
            .chat_stats
            .read()
            .await
            .iter()
            .map(|(id, stats)| (id.0, stats.clone()))
            .collect();

        StatsSnapshot {
            uptime_seconds: (chrono::Utc::now() - self.start_time).num_seconds(),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_classified: classified,
            spam_detected: self.spam_detected.load(Ordering::Relaxed),
            messages_deleted: self.messages_deleted.load(Ordering::Relaxed),
            notices_posted: self.notices_posted.load(Ordering::Relaxed),
            warnings_sent: self.warnings_sent.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
            classification_errors: self.classification_errors.load(Ordering::Relaxed),
            mean_score,
            chats,
        }
    }

    pub async fn log_summary(&self) {
        let snapshot = self.snapshot().await;
        info!(
            "Moderation stats: {} received, {} classified, {} spam, {} deleted, {} warned, {} failed, {} errors (mean score {:.3}, {} chats, up {}s)",
            snapshot.messages_received,
            snapshot.messages_classified,
            snapshot.spam_detected,
            snapshot.messages_deleted,
            snapshot.warnings_sent,
            snapshot.actions_failed,
            snapshot.classification_errors,
            snapshot.mean_score,
            snapshot.chats.len(),
            snapshot.uptime_seconds
        );
        match serde_json::to_string(&snapshot) {
            Ok(json) => debug!("Stats snapshot: {}", json),
            Err(e) => debug!("Failed to serialize stats snapshot: {}", e),
        }
    }

    /// Log a summary every `period` until shutdown begins
    pub fn spawn_reporter(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<ShutdownPhase>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.log_summary().await,
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Stats reporter stopped");
        })
    }
}

impl Default for ModerationStats {
    fn default() -> Self {
        Self::new()
    }
}
