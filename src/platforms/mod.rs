use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::{ChatId, MessageId, RawMessage};

pub mod telegram;

/// Failures of individual gateway calls. Callers branch on `PermissionDenied`.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The bot lacks the rights for the operation (e.g. not a chat admin)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The token is invalid or revoked
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("gateway is not connected")]
    NotConnected,
}

impl GatewayError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, GatewayError::PermissionDenied(_))
    }
}

/// Interface to the chat platform: inbound messages plus the moderation primitives
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Authenticate and start receiving messages
    async fn connect(&mut self) -> Result<()>;

    /// Inbound message stream; `None` before `connect` or once taken
    fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<RawMessage>>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), GatewayError>;

    async fn send_message(&self, chat: ChatId, text: &str, parse_mode: Option<&str>) -> Result<(), GatewayError>;

    /// Post `text` in the message's chat as a reply to it
    async fn reply_to(&self, message: &RawMessage, text: &str, parse_mode: Option<&str>) -> Result<(), GatewayError>;

    /// Get the platform identifier (e.g. "telegram")
    fn platform_name(&self) -> &str;

    async fn is_connected(&self) -> bool;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;
}
