//! Telegram Bot API client: long polling, messages with keyboards, callbacks.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vendhub_core::config::TelegramConfig;
use vendhub_core::error::{Result, VendHubError};
use vendhub_notify::Notifier;

use crate::keyboards::ReplyMarkup;

/// Telegram bot client.
#[derive(Clone)]
pub struct TelegramBot {
    config: TelegramConfig,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramBot {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.config.bot_token, method)
    }

    async fn call<T: for<'de> Deserialize<'de>>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| VendHubError::Channel(format!("{method} failed: {e}")))?;

        let body: TelegramApiResponse<T> = response
            .json()
            .await
            .map_err(|e| VendHubError::Channel(format!("Invalid {method} response: {e}")))?;

        if !body.ok {
            return Err(VendHubError::Channel(format!(
                "Telegram API error in {method}: {}",
                body.description.unwrap_or_default()
            )));
        }
        body.result
            .ok_or_else(|| VendHubError::Channel(format!("{method} returned no result")))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<TelegramUpdate>> {
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout_secs.to_string()),
                ("allowed_updates", "[\"message\",\"callback_query\"]".into()),
            ])
            .timeout(std::time::Duration::from_secs(timeout_secs + 10))
            .send()
            .await
            .map_err(|e| VendHubError::Channel(format!("Telegram getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| VendHubError::Channel(format!("Invalid Telegram response: {e}")))?;

        if !body.ok {
            return Err(VendHubError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }
        Ok(body.result.unwrap_or_default())
    }

    /// Send a Markdown message, optionally with a keyboard.
    pub async fn send_message(&self, chat_id: i64, text: &str, markup: Option<&ReplyMarkup>) -> Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(markup) = markup {
            body["reply_markup"] = serde_json::to_value(markup)?;
        }
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback_query(&self, query_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = serde_json::json!({ "callback_query_id": query_id });
        if let Some(text) = text {
            body["text"] = serde_json::Value::String(text.to_string());
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }

    pub async fn get_me(&self) -> Result<TelegramUser> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Spawn the polling loop. Stops when `stop` is cancelled or the stream is dropped.
    pub fn start_polling(self, stop: CancellationToken) -> TelegramPollingStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        tokio::spawn(async move {
            let bot = self;
            let mut offset = 0i64;
            let interval = Duration::from_secs(bot.config.poll_interval);
            tracing::info!("Telegram polling loop started");

            loop {
                let polled = tokio::select! {
                    _ = stop.cancelled() => break,
                    polled = bot.get_updates(offset, 30) => polled,
                };
                let pause = match polled {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            if let Some(input) = update.into_input()
                                && tx.send(input).is_err()
                            {
                                tracing::info!("Telegram polling stopped (receiver dropped)");
                                return;
                            }
                        }
                        interval
                    }
                    Err(e) => {
                        tracing::error!("Telegram polling error: {e}");
                        Duration::from_secs(5)
                    }
                };
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            tracing::info!("Telegram polling loop stopped");
        });

        TelegramPollingStream { rx }
    }
}

#[async_trait]
impl Notifier for TelegramBot {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text, None).await
    }
}

/// Stream of bot inputs produced by the polling loop.
pub struct TelegramPollingStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<BotInput>,
}

impl Stream for TelegramPollingStream {
    type Item = BotInput;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Unpin for TelegramPollingStream {}

/// What a user did, reduced to what the bot handlers care about.
#[derive(Debug, Clone, PartialEq)]
pub enum BotInput {
    Text {
        chat_id: i64,
        from_id: i64,
        text: String,
    },
    Photo {
        chat_id: i64,
        from_id: i64,
        file_id: String,
        caption: Option<String>,
    },
    Callback {
        query_id: String,
        chat_id: i64,
        from_id: i64,
        data: String,
    },
}

impl BotInput {
    pub fn chat_id(&self) -> i64 {
        match self {
            BotInput::Text { chat_id, .. }
            | BotInput::Photo { chat_id, .. }
            | BotInput::Callback { chat_id, .. } => *chat_id,
        }
    }

    pub fn from_id(&self) -> i64 {
        match self {
            BotInput::Text { from_id, .. }
            | BotInput::Photo { from_id, .. }
            | BotInput::Callback { from_id, .. } => *from_id,
        }
    }
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    pub message: Option<TelegramMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
}

impl TelegramUpdate {
    /// Reduce an update to a bot input. Bot senders and unsupported content are skipped.
    pub fn into_input(self) -> Option<BotInput> {
        if let Some(query) = self.callback_query {
            if query.from.is_bot {
                return None;
            }
            let chat_id = query.message.as_ref().map_or(query.from.id, |m| m.chat.id);
            return Some(BotInput::Callback {
                query_id: query.id,
                chat_id,
                from_id: query.from.id,
                data: query.data?,
            });
        }

        let msg = self.message?;
        let from = msg.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        let from_id = from.id;

        // Telegram sends several sizes; the last is the largest.
        if let Some(file_id) = msg.photo.as_ref().and_then(|p| p.last()).map(|p| p.file_id.clone()) {
            return Some(BotInput::Photo {
                chat_id: msg.chat.id,
                from_id,
                file_id,
                caption: msg.caption,
            });
        }

        Some(BotInput::Text {
            chat_id: msg.chat.id,
            from_id,
            text: msg.text?,
        })
    }
}
