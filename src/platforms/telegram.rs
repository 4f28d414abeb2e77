use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::env;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use url::Url;

use crate::config::TelegramSettings;
use crate::platforms::{GatewayError, MessagingGateway};
use crate::types::{ChatId, MessageId, RawMessage};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Slack on top of the long-poll timeout before the HTTP request is abandoned
const REQUEST_GRACE: Duration = Duration::from_secs(10);

/// Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    date: i64,
    chat: TelegramChat,
    from: Option<TelegramUser>,
    text: Option<String>,
    caption: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    first_name: String,
    last_name: Option<String>,
    username: Option<String>,
}

impl TelegramUser {
    fn display_name(&self) -> String {
        match (&self.username, &self.last_name) {
            (Some(username), _) => format!("@{}", username),
            (None, Some(last)) => format!("{} {}", self.first_name, last),
            (None, None) => self.first_name.clone(),
        }
    }
}

impl TelegramMessage {
    /// Text, or the media caption; `None` when there is nothing to classify
    fn into_raw_message(self) -> Option<RawMessage> {
        let text = self.text.or(self.caption)?;
        Some(RawMessage {
            chat_id: ChatId(self.chat.id),
            message_id: MessageId(self.message_id),
            text,
            sender: self.from.as_ref().map(TelegramUser::display_name),
            chat_title: self.chat.title,
            timestamp: chrono::Utc
                .timestamp_opt(self.date, 0)
                .single()
                .unwrap_or_else(chrono::Utc::now),
        })
    }
}

/// Map a failed Bot API call onto the error kinds the bot branches on
fn classify_api_error(code: i64, description: String, retry_after: Option<u64>) -> GatewayError {
    let lowered = description.to_lowercase();
    match code {
        401 => GatewayError::Unauthorized(description),
        403 => GatewayError::PermissionDenied(description),
        429 => GatewayError::RateLimited {
            retry_after: retry_after.unwrap_or(1),
        },
        400 if lowered.contains("can't be deleted") || lowered.contains("not enough rights") => {
            GatewayError::PermissionDenied(description)
        }
        _ => GatewayError::Api { code, description },
    }
}

fn parse_response<T: DeserializeOwned>(status: u16, body: &str) -> Result<T, GatewayError> {
    let envelope: ApiResponse<T> = serde_json::from_str(body)
        .map_err(|e| GatewayError::Decode(format!("HTTP {}: {}", status, e)))?;

    if envelope.ok {
        return envelope
            .result
            .ok_or_else(|| GatewayError::Decode("response has no result".to_string()));
    }

    Err(classify_api_error(
        envelope.error_code.unwrap_or(i64::from(status)),
        envelope.description.unwrap_or_default(),
        envelope.parameters.and_then(|p| p.retry_after),
    ))
}

/// Configuration for the Telegram Bot API connection
#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub api_base: String,
    pub poll_timeout_seconds: u64,
    pub drop_pending_updates: bool,
    pub channel_capacity: usize,
}

// Keeps the token out of debug logs
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"***")
            .field("api_base", &self.api_base)
            .field("poll_timeout_seconds", &self.poll_timeout_seconds)
            .field("drop_pending_updates", &self.drop_pending_updates)
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl TelegramConfig {
    /// Token from `BOT_TOKEN`, everything else from the loaded settings
    pub fn from_env(settings: &TelegramSettings) -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN").context("BOT_TOKEN environment variable not set")?;
        Self::new(bot_token, settings)
    }

    pub fn new(bot_token: String, settings: &TelegramSettings) -> Result<Self> {
        if bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN is empty"));
        }
        Url::parse(&settings.api_base)
            .with_context(|| format!("Invalid Telegram API base url: {}", settings.api_base))?;

        info!("Loaded Telegram config for API at {}", settings.api_base);
        Ok(Self {
            bot_token: bot_token.trim().to_string(),
            api_base: settings.api_base.clone(),
            poll_timeout_seconds: settings.poll_timeout_seconds,
            drop_pending_updates: settings.drop_pending_updates,
            channel_capacity: settings.channel_capacity.max(1),
        })
    }

    fn method_url(&self, method: &str) -> Result<Url, GatewayError> {
        let base = self.api_base.trim_end_matches('/');
        Url::parse(&format!("{}/bot{}/{}", base, self.bot_token, method))
            .map_err(|e| GatewayError::Decode(format!("cannot build url for {}: {}", method, e)))
    }
}

/// Thin Bot API client shared by the connection and its poller
#[derive(Clone)]
struct TelegramApi {
    config: Arc<TelegramConfig>,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    id: i64,
    username: Option<String>,
}

impl TelegramApi {
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<T, GatewayError> {
        let url = self.config.method_url(method)?;
        let mut request = self.http_client.post(url).json(&payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        // reqwest errors can carry the url, which contains the token
        let response = request.send().await.map_err(|e| e.without_url())?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.without_url())?;
        parse_response(status, &body)
    }

    async fn get_me(&self) -> Result<BotUser, GatewayError> {
        self.call("getMe", json!({}), Some(REQUEST_GRACE)).await
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> Result<bool, GatewayError> {
        self.call(
            "deleteWebhook",
            json!({ "drop_pending_updates": drop_pending_updates }),
            Some(REQUEST_GRACE),
        )
        .await
    }

    async fn get_updates(&self, offset: Option<i64>, timeout_seconds: u64) -> Result<Vec<Update>, GatewayError> {
        let mut payload = json!({
            "timeout": timeout_seconds,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        let timeout = Duration::from_secs(timeout_seconds) + REQUEST_GRACE;
        self.call("getUpdates", payload, Some(timeout)).await
    }

    /// Confirm everything before `offset` so it is not redelivered after a restart
    async fn acknowledge(&self, offset: i64) -> Result<(), GatewayError> {
        let _: Vec<serde_json::Value> = self
            .call(
                "getUpdates",
                json!({ "offset": offset, "limit": 1, "timeout": 0 }),
                Some(REQUEST_GRACE),
            )
            .await?;
        Ok(())
    }
}

/// Long-poll loop feeding the dispatcher channel
struct UpdatePoller {
    api: TelegramApi,
    sender: mpsc::Sender<RawMessage>,
    is_connected: Arc<RwLock<bool>>,
    stop: watch::Receiver<bool>,
    /// One past the last update handed to the dispatcher (or skipped)
    offset: Option<i64>,
}

impl UpdatePoller {
    fn new(
        api: TelegramApi,
        sender: mpsc::Sender<RawMessage>,
        is_connected: Arc<RwLock<bool>>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api,
            sender,
            is_connected,
            stop,
            offset: None,
        }
    }

    async fn run(mut self) {
        info!("Telegram update poller started");
        let mut backoff = INITIAL_BACKOFF;
        let timeout = self.api.config.poll_timeout_seconds;

        loop {
            let stop_requested = *self.stop.borrow();
            if stop_requested || !*self.is_connected.read().await {
                info!("Telegram connection marked as disconnected, stopping poller");
                break;
            }

            let result = tokio::select! {
                result = self.api.get_updates(self.offset, timeout) => result,
                changed = self.stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            match result {
                Ok(updates) => {
                    backoff = INITIAL_BACKOFF;
                    debug!("Polled {} Telegram updates", updates.len());
                    if !self.deliver(updates).await {
                        info!("Dispatcher stopped taking messages, stopping poller");
                        break;
                    }
                }
                Err(GatewayError::Unauthorized(description)) => {
                    error!("Telegram rejected the bot token ({}), marking as disconnected", description);
                    *self.is_connected.write().await = false;
                    break;
                }
                Err(GatewayError::RateLimited { retry_after }) => {
                    warn!("Telegram rate limit hit, retrying in {}s", retry_after);
                    if !self.pause(Duration::from_secs(retry_after)).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to poll Telegram updates: {}", e);
                    warn!("Backing off polling for {:?}", backoff);
                    if !self.pause(backoff).await {
                        break;
                    }
                    backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
                }
            }
        }

        // Only updates the dispatcher accepted are confirmed; the rest are redelivered after a restart
        if let Some(offset) = self.offset {
            if let Err(e) = self.api.acknowledge(offset).await {
                warn!("Failed to acknowledge Telegram updates up to {}: {}", offset, e);
            }
        }
        warn!("Telegram update poller stopped");
    }

    /// Hand a batch to the dispatcher. Returns false once the receiver is closed;
    /// the offset then stays on the first update that was not taken.
    async fn deliver(&mut self, updates: Vec<Update>) -> bool {
        for update in updates {
            let next_offset = update.update_id + 1;
            if let Some(message) = update.message.and_then(TelegramMessage::into_raw_message) {
                debug!("Telegram message from {}: {}", message.origin(), message.text);
                if self.sender.send(message).await.is_err() {
                    return false;
                }
            }
            self.offset = Some(next_offset);
        }
        true
    }

    /// Sleep unless a stop arrives first; false means stop
    async fn pause(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = sleep(duration) => true,
            changed = self.stop.changed() => changed.is_ok() && !*self.stop.borrow(),
        }
    }
}

/// Telegram Bot API connection implementation
pub struct TelegramConnection {
    api: TelegramApi,
    is_connected: Arc<RwLock<bool>>,
    message_receiver: Option<mpsc::Receiver<RawMessage>>,
    stop_sender: Option<watch::Sender<bool>>,
    poller: Option<JoinHandle<()>>,
}

impl TelegramConnection {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            api: TelegramApi {
                config: Arc::new(config),
                http_client: reqwest::Client::new(),
            },
            is_connected: Arc::new(RwLock::new(false)),
            message_receiver: None,
            stop_sender: None,
            poller: None,
        }
    }

    async fn ensure_connected(&self) -> Result<(), GatewayError> {
        if *self.is_connected.read().await {
            Ok(())
        } else {
            Err(GatewayError::NotConnected)
        }
    }
}

#[async_trait]
impl MessagingGateway for TelegramConnection {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Telegram Bot API...");

        let me = match self.api.get_me().await {
            Ok(me) => me,
            Err(GatewayError::Unauthorized(description)) => {
                return Err(anyhow::anyhow!("BOT_TOKEN was rejected by Telegram: {}", description));
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to connect to Telegram Bot API")),
        };
        info!(
            "Authenticated as @{} (id {})",
            me.username.as_deref().unwrap_or("unknown"),
            me.id
        );

        self.api
            .delete_webhook(self.api.config.drop_pending_updates)
            .await
            .context("Failed to remove Telegram webhook")?;
        debug!("Webhook removed, switching to long polling");

        let (tx, rx) = mpsc::channel(self.api.config.channel_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);
        self.message_receiver = Some(rx);
        self.stop_sender = Some(stop_tx);

        *self.is_connected.write().await = true;

        let poller = UpdatePoller::new(self.api.clone(), tx, Arc::clone(&self.is_connected), stop_rx);
        self.poller = Some(tokio::spawn(poller.run()));

        info!("Telegram connection established");
        Ok(())
    }

    fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<RawMessage>> {
        self.message_receiver.take()
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), GatewayError> {
        self.ensure_connected().await?;
        let deleted: bool = self
            .api
            .call(
                "deleteMessage",
                json!({ "chat_id": chat.0, "message_id": message.0 }),
                Some(REQUEST_GRACE),
            )
            .await?;
        if !deleted {
            return Err(GatewayError::Api {
                code: 400,
                description: "deleteMessage returned false".to_string(),
            });
        }
        debug!("Deleted message {} in chat {}", message, chat);
        Ok(())
    }

    async fn send_message(&self, chat: ChatId, text: &str, parse_mode: Option<&str>) -> Result<(), GatewayError> {
        self.ensure_connected().await?;
        let mut payload = json!({ "chat_id": chat.0, "text": text });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        let _: serde_json::Value = self.api.call("sendMessage", payload, Some(REQUEST_GRACE)).await?;
        debug!("Sent Telegram message to chat {}", chat);
        Ok(())
    }

    async fn reply_to(&self, message: &RawMessage, text: &str, parse_mode: Option<&str>) -> Result<(), GatewayError> {
        self.ensure_connected().await?;
        let mut payload = json!({
            "chat_id": message.chat_id.0,
            "text": text,
            "reply_parameters": {
                "message_id": message.message_id.0,
                "allow_sending_without_reply": true,
            },
        });
        if let Some(mode) = parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        let _: serde_json::Value = self.api.call("sendMessage", payload, Some(REQUEST_GRACE)).await?;
        debug!("Replied to message {} in chat {}", message.message_id, message.chat_id);
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "telegram"
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.is_connected.write().await = false;
        if let Some(stop) = self.stop_sender.take() {
            let _ = stop.send(true);
        }
        if let Some(mut poller) = self.poller.take() {
            match tokio::time::timeout(REQUEST_GRACE + REQUEST_GRACE, &mut poller).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Telegram poller ended abnormally: {}", e),
                Err(_) => {
                    warn!("Telegram poller did not stop in time, aborting it");
                    poller.abort();
                }
            }
        }
        self.message_receiver = None;
        info!("Disconnected from Telegram");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TelegramSettings {
        TelegramSettings::default()
    }

    #[test]
    fn test_parse_updates_with_text_and_caption() {
        let body = r#"{
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"message_id": 5, "date": 1700000000,
                    "chat": {"id": -1001, "type": "supergroup", "title": "Warga RT 05"},
                    "from": {"id": 7, "is_bot": false, "first_name": "Budi", "username": "budi_s"},
                    "text": "FREE SLOT GACOR"}},
                {"update_id": 11, "message": {"message_id": 6, "date": 1700000001,
                    "chat": {"id": -1001, "type": "supergroup"},
                    "from": {"id": 8, "is_bot": false, "first_name": "Siti", "last_name": "Aminah"},
                    "photo": [], "caption": "depo 10rb"}},
                {"update_id": 12, "message": {"message_id": 7, "date": 1700000002,
                    "chat": {"id": -1001, "type": "supergroup"}, "sticker": {}}},
                {"update_id": 13}
            ]
        }"#;
        let updates: Vec<Update> = parse_response(200, body).unwrap();
        assert_eq!(updates.len(), 4);

        let messages: Vec<RawMessage> = updates
            .into_iter()
            .filter_map(|u| u.message.and_then(TelegramMessage::into_raw_message))
            .collect();
        assert_eq!(messages.len(), 2);

        assert_eq!(messages[0].chat_id, ChatId(-1001));
        assert_eq!(messages[0].message_id, MessageId(5));
        assert_eq!(messages[0].text, "FREE SLOT GACOR");
        assert_eq!(messages[0].origin(), "@budi_s in Warga RT 05");
        assert_eq!(messages[0].timestamp.timestamp(), 1700000000);

        assert_eq!(messages[1].text, "depo 10rb");
        assert_eq!(messages[1].sender.as_deref(), Some("Siti Aminah"));
    }

    #[test]
    fn test_permission_errors() {
        let forbidden = r#"{"ok": false, "error_code": 403, "description": "Forbidden: bot is not a member of the supergroup chat"}"#;
        assert!(parse_response::<bool>(403, forbidden).unwrap_err().is_permission_denied());

        let cant_delete = r#"{"ok": false, "error_code": 400, "description": "Bad Request: message can't be deleted"}"#;
        assert!(parse_response::<bool>(400, cant_delete).unwrap_err().is_permission_denied());

        let no_rights = r#"{"ok": false, "error_code": 400, "description": "Bad Request: not enough rights to delete a message"}"#;
        assert!(parse_response::<bool>(400, no_rights).unwrap_err().is_permission_denied());
    }

    #[test]
    fn test_other_api_errors() {
        let not_found = r#"{"ok": false, "error_code": 400, "description": "Bad Request: message to delete not found"}"#;
        match parse_response::<bool>(400, not_found) {
            Err(GatewayError::Api { code, description }) => {
                assert_eq!(code, 400);
                assert!(description.contains("not found"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let limited = r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 7", "parameters": {"retry_after": 7}}"#;
        assert!(matches!(
            parse_response::<bool>(429, limited),
            Err(GatewayError::RateLimited { retry_after: 7 })
        ));

        let unauthorized = r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#;
        assert!(matches!(
            parse_response::<bool>(401, unauthorized),
            Err(GatewayError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_malformed_responses() {
        assert!(matches!(
            parse_response::<bool>(502, "<html>Bad Gateway</html>"),
            Err(GatewayError::Decode(_))
        ));
        assert!(matches!(
            parse_response::<bool>(200, r#"{"ok": true}"#),
            Err(GatewayError::Decode(_))
        ));
        // no error_code in the body falls back to the HTTP status
        assert!(parse_response::<bool>(403, r#"{"ok": false}"#)
            .unwrap_err()
            .is_permission_denied());
    }

    #[test]
    fn test_method_url() {
        let config = TelegramConfig::new("123:abc".to_string(), &settings()).unwrap();
        let url = config.method_url("getUpdates").unwrap();
        assert_eq!(url.as_str(), "https://api.telegram.org/bot123:abc/getUpdates");

        let mut custom = settings();
        custom.api_base = "http://localhost:8081/".to_string();
        let config = TelegramConfig::new("t".to_string(), &custom).unwrap();
        assert_eq!(config.method_url("getMe").unwrap().as_str(), "http://localhost:8081/bott/getMe");
    }

    #[test]
    fn test_config_rejects_empty_token_and_hides_it() {
        assert!(TelegramConfig::new("  ".to_string(), &settings()).is_err());

        let config = TelegramConfig::new("123:secret".to_string(), &settings()).unwrap();
        assert!(!format!("{:?}", config).contains("secret"));
    }

    #[tokio::test]
    async fn test_calls_before_connect_fail() {
        let config = TelegramConfig::new("123:abc".to_string(), &settings()).unwrap();
        let mut connection = TelegramConnection::new(config);
        assert!(!connection.is_connected().await);
        assert!(connection.take_message_receiver().is_none());
        assert!(matches!(
            connection.delete_message(ChatId(1), MessageId(2)).await,
            Err(GatewayError::NotConnected)
        ));
    }

    fn idle_poller(sender: mpsc::Sender<RawMessage>) -> (UpdatePoller, watch::Sender<bool>) {
        let config = TelegramConfig::new("123:abc".to_string(), &settings()).unwrap();
        let api = TelegramApi {
            config: Arc::new(config),
            http_client: reqwest::Client::new(),
        };
        let (stop_tx, stop_rx) = watch::channel(false);
        let poller = UpdatePoller::new(api, sender, Arc::new(RwLock::new(true)), stop_rx);
        (poller, stop_tx)
    }

    fn text_update(update_id: i64, text: &str) -> Update {
        serde_json::from_value(json!({
            "update_id": update_id,
            "message": {"message_id": update_id * 10, "date": 1700000000,
                "chat": {"id": -1001, "type": "supergroup"}, "text": text}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_offset_only_covers_accepted_updates() {
        let (tx, mut rx) = mpsc::channel(8);
        let (mut poller, _stop) = idle_poller(tx);

        let sticker: Update = serde_json::from_value(json!({"update_id": 11})).unwrap();
        assert!(poller.deliver(vec![text_update(10, "slot gacor"), sticker]).await);
        assert_eq!(poller.offset, Some(12));
        assert_eq!(rx.recv().await.unwrap().message_id, MessageId(100));

        // dispatcher is draining: nothing new is accepted, so nothing new is confirmed
        rx.close();
        assert!(!poller.deliver(vec![text_update(12, "depo 10rb"), text_update(13, "maxwin")]).await);
        assert_eq!(poller.offset, Some(12));
    }

    #[tokio::test]
    async fn test_backoff_pause_ends_on_stop() {
        let (tx, _rx) = mpsc::channel(1);
        let (mut poller, stop) = idle_poller(tx);

        stop.send(true).unwrap();
        let paused = tokio::time::timeout(Duration::from_secs(1), poller.pause(MAX_BACKOFF))
            .await
            .unwrap();
        assert!(!paused);
    }
}
