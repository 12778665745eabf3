use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;

pub type ChatId = i64;
pub type MessageId = i64;

/// Where the audio bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Upload a local file.
    File(PathBuf),
    /// Re-send a file the platform already stores.
    Remote(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub source: AudioSource,
    pub caption: String,
    pub title: Option<String>,
    pub performer: Option<String>,
}

/// Transient status shown next to the chat title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadVoice,
    UploadDocument,
}

impl ChatAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatAction::Typing => "typing",
            ChatAction::UploadVoice => "upload_voice",
            ChatAction::UploadDocument => "upload_document",
        }
    }
}

/// One inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

/// Outbound half of the chat platform.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageId>;

    /// Send text with one row of inline buttons.
    async fn send_buttons(&self, chat: ChatId, text: &str, buttons: &[Button])
        -> Result<MessageId>;

    async fn edit_text(&self, chat: ChatId, message: MessageId, text: &str) -> Result<()>;

    /// Deliver audio; returns the platform's file id for later re-sends.
    async fn send_audio(&self, chat: ChatId, audio: &AudioPayload) -> Result<String>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    async fn send_action(&self, chat: ChatId, action: ChatAction) -> Result<()>;
}
