//! Fakes for the pipeline's seams, shared by unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::fetch::{FetchInvoker, FetchRequest};
use crate::messenger::{AudioPayload, AudioSource, Button, ChatAction, ChatId, MessageId, Messenger};
use crate::tag::{Tagger, TrackInfo};
use crate::types::FetchOutcome;

/// Fake downloader: optionally writes files, then exits with `exit_code`.
pub(crate) struct FakeFetcher {
    pub(crate) files: Vec<String>,
    pub(crate) exit_code: i32,
    pub(crate) delay: Duration,
    pub(crate) calls: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) max_active: AtomicUsize,
    pub(crate) saw_dirty_workspace: AtomicBool,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl FakeFetcher {
    pub(crate) fn writing(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            exit_code: 0,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            saw_dirty_workspace: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub(crate) fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Flags the fetch as cancelled when dropped before completion.
struct CancelFlag(Arc<AtomicBool>, bool);

impl Drop for CancelFlag {
    fn drop(&mut self) {
        if !self.1 {
            self.0.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl FetchInvoker for FakeFetcher {
    async fn run(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let mut flag = CancelFlag(Arc::clone(&self.cancelled), false);

        if std::fs::read_dir(&request.output_dir).unwrap().count() != 0 {
            self.saw_dirty_workspace.store(true, Ordering::SeqCst);
        }
        tokio::time::sleep(self.delay).await;
        for rel in &self.files {
            let path = request.output_dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"flac").unwrap();
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        flag.1 = true;
        Ok(FetchOutcome {
            exit_code: Some(self.exit_code),
            stdout: String::new(),
            stderr: if self.exit_code == 0 { String::new() } else { "track not found".into() },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Text(String),
    Edit(MessageId, String),
    Audio(AudioPayload),
    Buttons(String, Vec<Button>),
    CallbackAnswer(String),
}

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    pub(crate) sent: Mutex<Vec<Sent>>,
    pub(crate) fail_audio: bool,
    pub(crate) audio_delay: Duration,
}

impl RecordingMessenger {
    pub(crate) fn failing_audio() -> Self {
        Self {
            fail_audio: true,
            ..Default::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn audio_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Audio(_)))
            .count()
    }

    pub(crate) fn last(&self) -> Sent {
        self.sent().last().cloned().unwrap()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, _chat: ChatId, text: &str) -> Result<MessageId> {
        self.sent.lock().unwrap().push(Sent::Text(text.into()));
        Ok(100)
    }

    async fn send_buttons(&self, _chat: ChatId, text: &str, buttons: &[Button]) -> Result<MessageId> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::Buttons(text.into(), buttons.to_vec()));
        Ok(101)
    }

    async fn edit_text(&self, _chat: ChatId, message: MessageId, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::Edit(message, text.into()));
        Ok(())
    }

    async fn send_audio(&self, _chat: ChatId, audio: &AudioPayload) -> Result<String> {
        tokio::time::sleep(self.audio_delay).await;
        if self.fail_audio {
            return Err(Error::Telegram("sendAudio: Request Entity Too Large".into()));
        }
        self.sent.lock().unwrap().push(Sent::Audio(audio.clone()));
        Ok(match &audio.source {
            AudioSource::Remote(id) => id.clone(),
            AudioSource::File(_) => "CQACAgQAAxkBAAIBZ".to_string(),
        })
    }

    async fn answer_callback(&self, id: &str, _text: Option<&str>) -> Result<()> {
        self.sent.lock().unwrap().push(Sent::CallbackAnswer(id.into()));
        Ok(())
    }

    async fn send_action(&self, _chat: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct CountingTagger(pub(crate) AtomicUsize);

#[async_trait]
impl Tagger for CountingTagger {
    async fn tag(&self, _path: &Path, _info: &TrackInfo, _comment: &str) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(Error::Tagging("read-only file".into()))
    }
}

