//! Telegram client: Bot API adapter for the `ChatClient` trait.
//!
//! Receives messages by long-polling `getUpdates` and answers with
//! `sendMessage`. Bot accounts authenticate with their token, so the
//! phone-code sign-in operations report `Unsupported`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::channels::{ChatClient, IncomingMessage, MessageStream};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const NAME: &str = "telegram";

/// Telegram Bot API client.
pub struct TelegramClient {
    bot_token: SecretString,
    owner_chat_id: Option<i64>,
    client: reqwest::Client,
    connected: AtomicBool,
    /// Set by `connect()`, cleared only by `stop()`. The poller exits when it goes false.
    running: Arc<AtomicBool>,
    /// The single getUpdates loop; replaced on every `updates()` call.
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramClient {
    pub fn new(bot_token: SecretString, owner_chat_id: Option<i64>) -> Self {
        Self {
            bot_token,
            owner_chat_id,
            client: reqwest::Client::new(),
            connected: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            poller: Mutex::new(None),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(self.bot_token.expose_secret(), method)
    }

    /// POST a JSON body to a Bot API method and return the `result` field.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, ChannelError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: {e}")))?;

        let status = resp.status();
        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Http(format!("{method}: invalid response body: {e}")))?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(api_error(method, status, description));
        }

        Ok(data.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Abort the running getUpdates loop, if any.
    fn abort_poller(&self) {
        let previous = match self.poller.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = previous {
            handle.abort();
            tracing::debug!("Previous Telegram poller aborted");
        }
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_message_chunk(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        });
        if let Some(message_id) = reply_to {
            body["reply_parameters"] = serde_json::json!({
                "message_id": message_id,
                "allow_sending_without_reply": true
            });
        }

        let markdown_err = match self.call("sendMessage", &body).await {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };
        tracing::warn!(
            chat_id,
            error = %markdown_err,
            "Telegram sendMessage with Markdown failed; retrying without parse_mode"
        );

        if let Some(obj) = body.as_object_mut() {
            obj.remove("parse_mode");
        }
        self.call("sendMessage", &body)
            .await
            .map(|_| ())
            .map_err(|plain_err| ChannelError::SendFailed {
                name: NAME.into(),
                reason: format!("sendMessage failed (markdown: {markdown_err}, plain: {plain_err})"),
            })
    }
}

#[async_trait]
impl ChatClient for TelegramClient {
    fn name(&self) -> &str {
        NAME
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), ChannelError> {
        let me = self.call("getMe", &serde_json::json!({})).await.map_err(|e| match e {
            ChannelError::AuthFailed { .. } => e,
            other => ChannelError::StartupFailed {
                name: NAME.into(),
                reason: other.to_string(),
            },
        })?;
        self.connected.store(true, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let username = me
            .get("username")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");
        tracing::info!(username, "Telegram client connected");
        Ok(())
    }

    async fn is_authorized(&self) -> bool {
        self.call("getMe", &serde_json::json!({})).await.is_ok()
    }

    async fn initialize(&self) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected { name: NAME.into() });
        }
        // getUpdates is refused while a webhook is set.
        self.call(
            "deleteWebhook",
            &serde_json::json!({ "drop_pending_updates": false }),
        )
        .await?;
        Ok(())
    }

    async fn updates(&self) -> Result<MessageStream, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected { name: NAME.into() });
        }

        // Only one getUpdates loop may run per bot token.
        self.abort_poller();
        self.running.store(true, Ordering::SeqCst);

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram client listening for messages...");

            while running.load(Ordering::SeqCst) && !tx.is_closed() {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    let description = data
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("no description");
                    tracing::warn!("Telegram getUpdates refused: {description}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                };

                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }
                    let Some(incoming) = parse_update(update) else {
                        continue;
                    };
                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }

            tracing::info!("Telegram polling stopped");
        });
        match self.poller.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i64>,
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        for (i, chunk) in chunks.iter().enumerate() {
            // Only the first chunk quotes the original message.
            let reply = if i == 0 { reply_to } else { None };
            self.send_message_chunk(chat_id, chunk, reply).await?;
        }
        Ok(())
    }

    async fn send_to_self(&self, text: &str) -> Result<(), ChannelError> {
        match self.owner_chat_id {
            Some(chat_id) => self.send_message(chat_id, text, None).await,
            None => {
                tracing::debug!("No owner chat configured; skipping self-notification");
                Ok(())
            }
        }
    }

    async fn send_code(&self, _phone: &str) -> Result<String, ChannelError> {
        Err(ChannelError::Unsupported {
            name: NAME.into(),
            operation: "phone code requests".into(),
        })
    }

    async fn sign_in(
        &self,
        _phone: &str,
        _code_hash: &str,
        _code: &str,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported {
            name: NAME.into(),
            operation: "phone sign-in".into(),
        })
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.running.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.abort_poller();
        tracing::info!("Telegram client stopped");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(token: &str, method: &str) -> String {
    format!("https://api.telegram.org/bot{token}/{method}")
}

/// Map a refused Bot API call to a channel error. A rejected token is an
/// authentication failure; everything else is reported as HTTP.
fn api_error(method: &str, status: StatusCode, description: &str) -> ChannelError {
    if status == StatusCode::UNAUTHORIZED {
        ChannelError::AuthFailed {
            name: NAME.into(),
            reason: format!("{method}: {description}"),
        }
    } else {
        ChannelError::Http(format!("{method} returned {status}: {description}"))
    }
}

/// Convert one getUpdates entry into an incoming message.
fn parse_update(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let chat_id = message.get("chat")?.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;

    let mut incoming = match message.get("text").and_then(Value::as_str) {
        Some(text) => IncomingMessage::new(chat_id, message_id, text),
        None => IncomingMessage::without_text(chat_id, message_id),
    };

    let from = message.get("from");
    if let Some(name) = from
        .and_then(|f| f.get("first_name"))
        .or_else(|| from.and_then(|f| f.get("username")))
        .and_then(Value::as_str)
    {
        incoming = incoming.with_sender_name(name);
    }
    Some(incoming)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut boundary = max_len;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let chunk = &remaining[..boundary];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(boundary);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { boundary } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
