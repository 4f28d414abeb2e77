// src/types/mod.rs - Core message and classification types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque chat identifier assigned by the messaging platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque message identifier, unique within a chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as delivered by the messaging gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub text: String,
    pub sender: Option<String>,
    pub chat_title: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl RawMessage {
    pub fn new(chat_id: ChatId, message_id: MessageId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            message_id,
            text: text.into(),
            sender: None,
            chat_title: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Human readable origin for log lines
    pub fn origin(&self) -> String {
        let chat = self.chat_title.clone().unwrap_or_else(|| self.chat_id.to_string());
        match &self.sender {
            Some(sender) => format!("{} in {}", sender, chat),
            None => chat,
        }
    }
}

/// Fixed-length token id sequence fed to the classifier. Padding id is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSequence(Vec<u32>);

impl EncodedSequence {
    pub const PADDING_ID: u32 = 0;

    pub fn new(ids: Vec<u32>) -> Self {
        Self(ids)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Number of positions holding a real token
    pub fn token_count(&self) -> usize {
        self.0.iter().filter(|&&id| id != Self::PADDING_ID).count()
    }

    pub fn is_all_padding(&self) -> bool {
        self.token_count() == 0
    }
}

/// Classifier output, always a finite probability in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Score(f32);

impl Score {
    pub fn new(value: f32) -> Result<Self, String> {
        if !value.is_finite() {
            return Err(format!("score must be finite, got {}", value));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(format!("score must lie in [0, 1], got {}", value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Outcome of the decision policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Suppress,
    Allow,
}

/// Everything the pipeline derived from one message text
#[derive(Debug, Clone)]
pub struct Classification {
    pub normalized: String,
    pub sequence: EncodedSequence,
    pub score: Score,
    pub decision: Decision,
}

/// What the action dispatcher ended up doing for a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Benign message, nothing was done
    Allowed,
    /// Message deleted; `notified` tells whether the chat notice went out
    Deleted { notified: bool },
    /// Deletion not permitted, a warning reply was posted instead
    Warned,
    /// Neither deletion nor the warning succeeded
    Failed { reason: String },
}
