//! Minimal Telegram Bot API client over `reqwest`.
//!
//! Only the handful of methods the bot needs are implemented. The base URL
//! follows the `https://api.telegram.org/bot` convention: the token is
//! appended directly, then `/<method>`. Pointing it at a self-hosted Bot API
//! server lifts the 50 MB upload limit, which matters for hi-res files.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::messenger::{AudioPayload, AudioSource, Button, ChatAction, ChatId, MessageId, Messenger};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org/bot";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub audio: Option<FileRef>,
    pub document: Option<FileRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

#[derive(Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 2],
}

#[derive(Serialize)]
struct SendCachedAudio<'a> {
    chat_id: ChatId,
    audio: &'a str,
    caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    performer: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}{}/{}", self.base_url, self.token, method)
    }

    async fn call<T, P>(&self, method: &str, params: &P) -> Result<T>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        let response = self
            .http
            .post(self.method_url(method))
            .json(params)
            .send()
            .await?;
        Self::parse(method, response).await
    }

    /// Telegram reports failures in the JSON envelope, usually alongside a
    /// 4xx status, so the body is parsed regardless of status.
    async fn parse<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await?;
        if !envelope.ok {
            let description = envelope
                .description
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(Error::Telegram(format!("{method}: {description}")));
        }
        envelope
            .result
            .ok_or_else(|| Error::Telegram(format!("{method}: response without result")))
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        let params = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ["message", "callback_query"],
        };
        let response = self
            .http
            .post(self.method_url("getUpdates"))
            .json(&params)
            .timeout(timeout + Duration::from_secs(10))
            .send()
            .await?;
        Self::parse("getUpdates", response).await
    }

    async fn upload_audio(&self, chat: ChatId, path: &Path, audio: &AudioPayload) -> Result<Message> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "track.flac".into());

        let part = Part::stream_with_length(file, len)
            .file_name(file_name)
            .mime_str("audio/flac")?;

        let mut form = Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", audio.caption.clone())
            .part("audio", part);
        if let Some(title) = &audio.title {
            form = form.text("title", title.clone());
        }
        if let Some(performer) = &audio.performer {
            form = form.text("performer", performer.clone());
        }

        debug!(path = %path.display(), bytes = len, "uploading audio");
        let response = self
            .http
            .post(self.method_url("sendAudio"))
            .multipart(form)
            .send()
            .await?;
        Self::parse("sendAudio", response).await
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageId> {
        let message: Message = self
            .call("sendMessage", &json!({ "chat_id": chat, "text": text }))
            .await?;
        Ok(message.message_id)
    }

    async fn send_buttons(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[Button],
    ) -> Result<MessageId> {
        let row: Vec<_> = buttons
            .iter()
            .map(|b| json!({ "text": b.text, "callback_data": b.callback_data }))
            .collect();
        let message: Message = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": chat,
                    "text": text,
                    "reply_markup": { "inline_keyboard": [row] },
                }),
            )
            .await?;
        Ok(message.message_id)
    }

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<()> {
        // Returns the edited Message; only success matters here.
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                &json!({ "chat_id": chat, "message_id": message, "text": text }),
            )
            .await?;
        Ok(())
    }

    async fn send_audio(&self, chat: ChatId, audio: &AudioPayload) -> Result<String> {
        let message = match &audio.source {
            AudioSource::File(path) => self.upload_audio(chat, path, audio).await?,
            AudioSource::Remote(file_id) => {
                let params = SendCachedAudio {
                    chat_id: chat,
                    audio: file_id,
                    caption: &audio.caption,
                    title: audio.title.as_deref(),
                    performer: audio.performer.as_deref(),
                };
                self.call("sendAudio", &params).await?
            }
        };

        message
            .audio
            .or(message.document)
            .map(|f| f.file_id)
            .ok_or_else(|| Error::DeliveryTransport("sendAudio response carried no file id".into()))
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &match text {
                    Some(text) => json!({ "callback_query_id": callback_id, "text": text }),
                    None => json!({ "callback_query_id": callback_id }),
                },
            )
            .await?;
        Ok(())
    }

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> Result<()> {
        let _: bool = self
            .call(
                "sendChatAction",
                &json!({ "chat_id": chat, "action": action.as_str() }),
            )
            .await?;
        Ok(())
    }
}
