//! # JudiGuard
//!
//! Telegram group moderation bot that removes Indonesian online-gambling
//! ("judi online") promotion spam. Every incoming message goes through a
//! normalize → encode → score → decide pipeline backed by a pre-trained
//! LSTM classifier; messages scoring above the threshold are deleted, and
//! when the bot lacks admin rights it replies with a warning instead.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use judiguard::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = ModelSettings::default();
//!     let pipeline = ModelStore::new(settings).load_pipeline(DecisionPolicy::new(0.5)?)?;
//!
//!     let gateway = TelegramConnection::new(TelegramConfig::from_env(&TelegramSettings::default())?);
//!     let dispatcher = ActionDispatcher::from_settings(&ModerationSettings::default());
//!     let shutdown = Arc::new(GracefulShutdown::with_default_config());
//!
//!     let mut bot = ModerationBot::new(Box::new(gateway), pipeline, dispatcher, Arc::clone(&shutdown));
//!     bot.start().await?;
//!
//!     shutdown.start_signal_handlers().await;
//!     shutdown.wait_for_shutdown().await?;
//!     bot.shutdown().await
//! }
//! ```

pub mod bot;
pub mod classifier;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::moderation::{ActionDispatcher, DecisionPolicy};
    pub use crate::bot::shutdown::{GracefulShutdown, ShutdownConfig};
    pub use crate::bot::ModerationBot;
    pub use crate::classifier::{
        ClassificationPipeline, Classifier, ModelStore, SequenceEncoder, TextNormalizer,
    };
    pub use crate::config::{ConfigurationManager, ModelSettings, ModerationSettings, TelegramSettings};
    pub use crate::platforms::{
        telegram::{TelegramConfig, TelegramConnection},
        GatewayError, MessagingGateway,
    };
    pub use crate::types::{ActionOutcome, ChatId, Decision, MessageId, RawMessage, Score};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
