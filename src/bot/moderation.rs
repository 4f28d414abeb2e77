// src/bot/moderation.rs - Threshold decision and moderation actions

use log::{error, info, warn};

use crate::config::{ConfigError, ModerationSettings};
use crate::platforms::{GatewayError, MessagingGateway};
use crate::types::{ActionOutcome, Decision, RawMessage, Score};

pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// SUPPRESS iff `score > threshold`; a score equal to the threshold is allowed
pub fn decide(score: Score, threshold: f32) -> Decision {
    if score.value() > threshold {
        Decision::Suppress
    } else {
        Decision::Allow
    }
}

/// Fixed threshold for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionPolicy {
    threshold: f32,
}

impl DecisionPolicy {
    pub fn new(threshold: f32) -> Result<Self, ConfigError> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ThresholdOutOfRange(threshold));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn decide(&self, score: Score) -> Decision {
        decide(score, self.threshold)
    }
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Chat-facing texts; `{prob}` becomes the score with two decimals
#[derive(Debug, Clone)]
pub struct ModerationMessages {
    pub deleted_notice: String,
    pub permission_warning: String,
    pub parse_mode: Option<String>,
}

impl ModerationMessages {
    pub fn render(template: &str, score: Score) -> String {
        template.replace("{prob}", &score.to_string())
    }
}

impl From<&ModerationSettings> for ModerationMessages {
    fn from(settings: &ModerationSettings) -> Self {
        Self {
            deleted_notice: settings.deleted_notice.clone(),
            permission_warning: settings.permission_warning.clone(),
            parse_mode: settings.parse_mode.clone(),
        }
    }
}

/// Turns a decision into gateway calls. At most one attempt per message.
pub struct ActionDispatcher {
    messages: ModerationMessages,
    notify_on_delete: bool,
}

impl ActionDispatcher {
    pub fn new(messages: ModerationMessages, notify_on_delete: bool) -> Self {
        Self {
            messages,
            notify_on_delete,
        }
    }

    pub fn from_settings(settings: &ModerationSettings) -> Self {
        Self::new(ModerationMessages::from(settings), settings.notify_on_delete)
    }

    pub async fn act(
        &self,
        decision: Decision,
        message: &RawMessage,
        score: Score,
        gateway: &dyn MessagingGateway,
    ) -> ActionOutcome {
        if decision == Decision::Allow {
            return ActionOutcome::Allowed;
        }

        let parse_mode = self.messages.parse_mode.as_deref();
        match gateway.delete_message(message.chat_id, message.message_id).await {
            Ok(()) => {
                warn!(
                    "Deleted gambling spam {} from {} (score {})",
                    message.message_id,
                    message.origin(),
                    score
                );
                if !self.notify_on_delete {
                    return ActionOutcome::Deleted { notified: false };
                }

                let notice = ModerationMessages::render(&self.messages.deleted_notice, score);
                match gateway.send_message(message.chat_id, &notice, parse_mode).await {
                    Ok(()) => ActionOutcome::Deleted { notified: true },
                    Err(e) => {
                        error!("Failed to post deletion notice in chat {}: {}", message.chat_id, e);
                        ActionOutcome::Deleted { notified: false }
                    }
                }
            }
            Err(GatewayError::PermissionDenied(reason)) => {
                warn!(
                    "No permission to delete message {} in {} ({}), posting warning instead",
                    message.message_id,
                    message.origin(),
                    reason
                );
                let warning = ModerationMessages::render(&self.messages.permission_warning, score);
                match gateway.reply_to(message, &warning, parse_mode).await {
                    Ok(()) => {
                        info!("Warning posted for message {} in chat {}", message.message_id, message.chat_id);
                        ActionOutcome::Warned
                    }
                    Err(e) => {
                        error!("Failed to post warning in chat {}: {}", message.chat_id, e);
                        ActionOutcome::Failed { reason: e.to_string() }
                    }
                }
            }
            Err(e) => {
                error!(
                    "Failed to delete message {} in chat {}: {}",
                    message.message_id, message.chat_id, e
                );
                ActionOutcome::Failed { reason: e.to_string() }
            }
        }
    }
}
