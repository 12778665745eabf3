//! Download-and-deliver pipeline.
//!
//! One call to [`Orchestrator::handle`] drives a request through
//!
//! ```text
//! Received -> CacheCheck -> CacheHit -> DeliveringCached -> Done
//!                        \-> CacheMiss -> WorkspaceAcquired -> Fetching -> Locating
//!                              -> Found -> [Tagging] -> DeliveringNew -> CacheStore -> Cleanup -> Done
//!                              -> NotFound -> Cleanup -> Failed
//! ```
//!
//! The cache is checked again once the workspace is held; a hit there goes
//! `WorkspaceAcquired -> Cleanup -> CacheHit -> DeliveringCached -> Done`.
//!
//! and any error on the way ends in `Cleanup -> Failed`. Every run ends with
//! exactly one final outbound message: the audio on success, a failure notice
//! otherwise.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::CacheGateway;
use crate::config::BotConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::fetch::{FetchInvoker, FetchRequest};
use crate::locate::{find_artifact, LOSSLESS_EXTENSIONS};
use crate::messenger::{AudioPayload, AudioSource, ChatAction, ChatId, MessageId, Messenger};
use crate::tag::{describe, Tagger, TrackInfo};
use crate::types::{CacheEntry, Request};
use crate::workspace::{Workspace, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    CacheCheck,
    CacheHit,
    DeliveringCached,
    CacheMiss,
    WorkspaceAcquired,
    Fetching,
    Locating,
    Found,
    NotFound,
    Tagging,
    DeliveringNew,
    CacheStore,
    Cleanup,
    Done,
    Failed,
}

/// What happened to one request.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub key: String,
    /// Every state visited, in order. The last one is `Done` or `Failed`.
    pub states: Vec<DeliveryState>,
    pub error: Option<ErrorKind>,
    /// File id of the delivered audio.
    pub remote_file_ref: Option<String>,
}

impl DeliveryReport {
    pub fn terminal(&self) -> DeliveryState {
        self.states.last().copied().unwrap_or(DeliveryState::Received)
    }

    pub fn is_done(&self) -> bool {
        self.terminal() == DeliveryState::Done
    }

    pub fn from_cache(&self) -> bool {
        self.states.contains(&DeliveryState::CacheHit)
    }

    pub fn visited(&self, state: DeliveryState) -> bool {
        self.states.contains(&state)
    }
}

/// Where progress and results for a request go.
#[derive(Debug, Clone, Copy)]
pub struct ReplyTarget {
    pub chat: ChatId,
    /// Message to edit with progress and failures. A new one is sent when absent.
    pub status_message: Option<MessageId>,
}

impl ReplyTarget {
    pub fn new(chat: ChatId) -> Self {
        Self {
            chat,
            status_message: None,
        }
    }

    pub fn with_status(chat: ChatId, message: MessageId) -> Self {
        Self {
            chat,
            status_message: Some(message),
        }
    }
}

/// Per-pipeline knobs taken from [`BotConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_timeout: Duration,
    pub upload_timeout: Duration,
    pub embed_art: bool,
    pub tag_comment: Option<String>,
    pub extensions: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&BotConfig::default())
    }
}

impl From<&BotConfig> for PipelineSettings {
    fn from(config: &BotConfig) -> Self {
        Self {
            fetch_timeout: config.fetch_timeout,
            upload_timeout: config.upload_timeout,
            embed_art: config.embed_art,
            tag_comment: config.tag_comment.clone(),
            extensions: LOSSLESS_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

pub struct Orchestrator {
    workspace: WorkspaceManager,
    fetcher: Arc<dyn FetchInvoker>,
    cache: Arc<dyn CacheGateway>,
    messenger: Arc<dyn Messenger>,
    tagger: Option<Arc<dyn Tagger>>,
    settings: PipelineSettings,
}

/// Bookkeeping for a single run.
struct Run {
    key: String,
    states: Vec<DeliveryState>,
}

impl Run {
    fn enter(&mut self, state: DeliveryState) {
        debug!(key = %self.key, ?state, "pipeline state");
        self.states.push(state);
    }
}

impl Orchestrator {
    pub fn new(
        workspace: WorkspaceManager,
        fetcher: Arc<dyn FetchInvoker>,
        cache: Arc<dyn CacheGateway>,
        messenger: Arc<dyn Messenger>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            workspace,
            fetcher,
            cache,
            messenger,
            tagger: None,
            settings,
        }
    }

    pub fn with_tagger(mut self, tagger: Arc<dyn Tagger>) -> Self {
        self.tagger = Some(tagger);
        self
    }

    pub fn cache(&self) -> &Arc<dyn CacheGateway> {
        &self.cache
    }

    /// Run one request to a terminal state. Never returns an error: failures
    /// are reported to the user and recorded in the report.
    pub async fn handle(&self, request: &Request, target: ReplyTarget) -> DeliveryReport {
        let mut run = Run {
            key: request.cache_key(),
            states: Vec::new(),
        };
        run.enter(DeliveryState::Received);
        info!(locator = %request.locator, quality = %request.quality, key = %run.key, "request received");

        let status = match target.status_message {
            Some(id) => Some(id),
            None => match self.messenger.send_text(target.chat, "Looking up your track...").await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(error = %e, "could not post status message");
                    None
                }
            },
        };

        let result = self.drive(request, target.chat, status, &mut run).await;

        match result {
            Ok(file_id) => {
                run.enter(DeliveryState::Done);
                info!(key = %run.key, "request delivered");
                DeliveryReport {
                    key: run.key,
                    states: run.states,
                    error: None,
                    remote_file_ref: Some(file_id),
                }
            }
            Err(e) => {
                let kind = e.kind();
                if !run.states.contains(&DeliveryState::Cleanup) {
                    run.enter(DeliveryState::Cleanup);
                }
                run.enter(DeliveryState::Failed);
                warn!(key = %run.key, error = %e, %kind, "request failed");
                self.notify_failure(target.chat, status, kind).await;
                DeliveryReport {
                    key: run.key,
                    states: run.states,
                    error: Some(kind),
                    remote_file_ref: None,
                }
            }
        }
    }

    async fn drive(
        &self,
        request: &Request,
        chat: ChatId,
        status: Option<MessageId>,
        run: &mut Run,
    ) -> Result<String> {
        run.enter(DeliveryState::CacheCheck);
        if let Some(entry) = self.lookup(&run.key).await {
            return self.deliver_cached(entry, chat, status, run).await;
        }

        run.enter(DeliveryState::CacheMiss);
        let workspace = self.workspace.acquire().await?;
        run.enter(DeliveryState::WorkspaceAcquired);

        // A request for the same key may have filled the cache while this
        // one waited for the workspace.
        if let Some(entry) = self.lookup(&run.key).await {
            debug!(key = %run.key, "cache filled while waiting for the workspace");
            run.enter(DeliveryState::Cleanup);
            if let Err(e) = workspace.release().await {
                warn!(error = %e, "workspace release failed");
            }
            return self.deliver_cached(entry, chat, status, run).await;
        }

        let outcome = self.fetch_and_deliver(request, chat, status, &workspace, run).await;

        run.enter(DeliveryState::Cleanup);
        let dir = workspace.path().to_path_buf();
        match (outcome, workspace.release().await) {
            (Ok(file_id), Ok(())) => Ok(file_id),
            (Ok(file_id), Err(e)) => {
                // The user already has the file; the next acquire wipes the
                // directory again.
                warn!(path = %dir.display(), error = %e, "workspace release failed after delivery");
                Ok(file_id)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                warn!(path = %dir.display(), error = %release_err, "workspace release failed");
                Err(e)
            }
        }
    }

    /// Cache read; errors count as a miss.
    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.lookup(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "cache lookup failed, fetching instead");
                None
            }
        }
    }

    async fn deliver_cached(
        &self,
        entry: CacheEntry,
        chat: ChatId,
        status: Option<MessageId>,
        run: &mut Run,
    ) -> Result<String> {
        run.enter(DeliveryState::CacheHit);
        self.progress(chat, status, "Fast-loading from cache...").await;

        run.enter(DeliveryState::DeliveringCached);
        let payload = AudioPayload {
            source: AudioSource::Remote(entry.remote_file_ref.clone()),
            caption: format!("Quality: {} (cached)", entry.quality.label()),
            title: None,
            performer: None,
        };
        self.deliver(chat, &payload).await?;
        Ok(entry.remote_file_ref)
    }

    async fn fetch_and_deliver(
        &self,
        request: &Request,
        chat: ChatId,
        status: Option<MessageId>,
        workspace: &Workspace,
        run: &mut Run,
    ) -> Result<String> {
        run.enter(DeliveryState::Fetching);
        self.progress(
            chat,
            status,
            &format!("Downloading ({})...", request.quality.label()),
        )
        .await;
        if let Err(e) = self.messenger.send_action(chat, ChatAction::UploadVoice).await {
            debug!(error = %e, "chat action failed");
        }

        let fetch_request = FetchRequest {
            locator: request.locator.clone(),
            quality: request.quality,
            output_dir: workspace.path().to_path_buf(),
            embed_art: self.settings.embed_art,
        };
        let outcome = tokio::time::timeout(
            self.settings.fetch_timeout,
            self.fetcher.run(&fetch_request),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: "fetch",
            after: self.settings.fetch_timeout,
        })??;

        run.enter(DeliveryState::Locating);
        let located = self.locate(workspace.path()).await?;
        let Some((path, info)) = located else {
            run.enter(DeliveryState::NotFound);
            return Err(if outcome.success() {
                Error::ArtifactNotFound {
                    dir: workspace.path().to_path_buf(),
                }
            } else {
                Error::FetchProcess {
                    code: outcome.exit_code,
                    stderr: outcome.stderr,
                }
            });
        };
        run.enter(DeliveryState::Found);
        if !outcome.success() {
            info!(exit_code = ?outcome.exit_code, "fetch tool reported failure but produced a file");
        }

        if let (Some(tagger), Some(comment)) = (&self.tagger, &self.settings.tag_comment) {
            run.enter(DeliveryState::Tagging);
            if let Err(e) = tagger.tag(&path, &info, comment).await {
                warn!(path = %path.display(), error = %e, "tagging failed, sending untagged file");
            }
        }

        run.enter(DeliveryState::DeliveringNew);
        self.progress(chat, status, "Uploading...").await;
        if let Err(e) = self.messenger.send_action(chat, ChatAction::UploadDocument).await {
            debug!(error = %e, "chat action failed");
        }
        let payload = AudioPayload {
            source: AudioSource::File(path),
            caption: format!("Quality: {}", request.quality.label()),
            title: info.title,
            performer: info.performer,
        };
        let file_id = self.deliver(chat, &payload).await?;

        run.enter(DeliveryState::CacheStore);
        match self.cache.store(&run.key, &file_id, request.quality).await {
            Ok(()) => {}
            Err(Error::DuplicateKey(key)) => {
                debug!(%key, "cache entry already present");
            }
            Err(e) => {
                warn!(key = %run.key, error = %e, "cache write failed");
            }
        }
        Ok(file_id)
    }

    async fn locate(&self, dir: &Path) -> Result<Option<(PathBuf, TrackInfo)>> {
        let dir = dir.to_path_buf();
        let extensions = self.settings.extensions.clone();
        tokio::task::spawn_blocking(move || {
            let exts: Vec<&str> = extensions.iter().map(String::as_str).collect();
            find_artifact(&dir, &exts).map(|path| {
                let info = describe(&path, &dir);
                (path, info)
            })
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))
    }

    async fn deliver(&self, chat: ChatId, payload: &AudioPayload) -> Result<String> {
        tokio::time::timeout(
            self.settings.upload_timeout,
            self.messenger.send_audio(chat, payload),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: "upload",
            after: self.settings.upload_timeout,
        })?
    }

    /// Best-effort progress update on the status message.
    async fn progress(&self, chat: ChatId, status: Option<MessageId>, text: &str) {
        if let Some(message) = status {
            if let Err(e) = self.messenger.edit_text(chat, message, text).await {
                debug!(error = %e, "progress update failed");
            }
        }
    }

    async fn notify_failure(&self, chat: ChatId, status: Option<MessageId>, kind: ErrorKind) {
        let text = format!("Failed: {}", kind.user_notice());
        if let Some(message) = status {
            match self.messenger.edit_text(chat, message, &text).await {
                Ok(()) => return,
                Err(e) => warn!(error = %e, "could not edit status message"),
            }
        }
        if let Err(e) = self.messenger.send_text(chat, &text).await {
            warn!(error = %e, "could not send failure notice");
        }
    }
}
