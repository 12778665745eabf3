//! Update routing and the long-polling loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::BotConfig;
use crate::error::Result;
use crate::messenger::{Button, ChatAction, ChatId, MessageId, Messenger};
use crate::orchestrator::{DeliveryReport, Orchestrator, ReplyTarget};
use crate::telegram::{TelegramClient, Update};
use crate::types::{qobuz_id, Quality, Request};

const GREETING: &str = "Hi-Res 24-bit Downloader\nUse /search [song] or send a link.";
const SEARCH_USAGE: &str = "Usage: /search artist song";

/// Pause after a failed `getUpdates` before polling again.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// An update, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Start {
        chat: ChatId,
    },
    Search {
        chat: ChatId,
        query: String,
    },
    Stats {
        chat: ChatId,
        user: i64,
    },
    /// A Qobuz track link: let the user pick the quality.
    OfferQuality {
        chat: ChatId,
        track_id: String,
    },
    Download {
        chat: ChatId,
        request: Request,
        /// Message to turn into the status message (the pressed keyboard).
        status: Option<MessageId>,
        callback_id: Option<String>,
    },
}

/// Classify an update. Returns `None` for anything the bot ignores.
pub fn route(update: &Update, default_quality: Quality) -> Option<Inbound> {
    if let Some(callback) = &update.callback_query {
        let message = callback.message.as_ref()?;
        let (quality, track_id) = parse_callback_data(callback.data.as_deref()?)?;
        return Some(Inbound::Download {
            chat: message.chat.id,
            request: Request::new(track_url(&track_id), quality),
            status: Some(message.message_id),
            callback_id: Some(callback.id.clone()),
        });
    }

    let message = update.message.as_ref()?;
    let chat = message.chat.id;
    let text = message.text.as_deref()?.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(command) = text.strip_prefix('/') {
        let (name, args) = command.split_once(char::is_whitespace).unwrap_or((command, ""));
        // Group chats address commands as /cmd@botname.
        let name = name.split('@').next().unwrap_or(name);
        return match name {
            "start" | "help" => Some(Inbound::Start { chat }),
            "search" => Some(Inbound::Search {
                chat,
                query: args.trim().to_string(),
            }),
            "stats" => Some(Inbound::Stats {
                chat,
                user: message.from.as_ref()?.id,
            }),
            _ => None,
        };
    }

    if let Some(("track", track_id)) = qobuz_id(text) {
        return Some(Inbound::OfferQuality { chat, track_id });
    }

    Some(Inbound::Download {
        chat,
        request: Request::new(text, default_quality),
        status: None,
        callback_id: None,
    })
}

/// Callback data format: `dl:<quality>:<track id>`.
pub fn callback_data(quality: Quality, track_id: &str) -> String {
    format!("dl:{quality}:{track_id}")
}

fn parse_callback_data(data: &str) -> Option<(Quality, String)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != "dl" {
        return None;
    }
    let quality = parts.next()?.parse().ok()?;
    let track_id = parts.next()?;
    if track_id.is_empty() || !track_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((quality, track_id.to_string()))
}

fn track_url(track_id: &str) -> String {
    format!("https://open.qobuz.com/track/{track_id}")
}

pub struct Bot {
    config: BotConfig,
    messenger: Arc<dyn Messenger>,
    orchestrator: Arc<Orchestrator>,
}

impl Bot {
    pub fn new(config: BotConfig, messenger: Arc<dyn Messenger>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            messenger,
            orchestrator,
        }
    }

    /// Act on one inbound event. Downloads are spawned onto `tasks` so the
    /// caller can go straight back to polling.
    pub async fn dispatch(&self, inbound: Inbound, tasks: &mut JoinSet<DeliveryReport>) -> Result<()> {
        match inbound {
            Inbound::Start { chat } => {
                self.messenger.send_text(chat, GREETING).await?;
            }
            Inbound::Search { chat, query } => {
                if query.is_empty() {
                    self.messenger.send_text(chat, SEARCH_USAGE).await?;
                } else {
                    self.messenger.send_action(chat, ChatAction::Typing).await?;
                    let request = Request::new(query, self.config.default_quality);
                    self.spawn_download(request, ReplyTarget::new(chat), tasks);
                }
            }
            Inbound::Stats { chat, user } => {
                if !self.config.is_admin(user) {
                    debug!(user, "ignoring /stats from non-admin");
                    return Ok(());
                }
                let total = self.orchestrator.cache().count().await?;
                let text = format!(
                    "Bot Statistics\n\nTotal Tracks Cached: {total}\nServer Status: Online"
                );
                self.messenger.send_text(chat, &text).await?;
            }
            Inbound::OfferQuality { chat, track_id } => {
                let buttons = [
                    Button {
                        text: "Download 24-bit FLAC".into(),
                        callback_data: callback_data(Quality::HiRes, &track_id),
                    },
                    Button {
                        text: "Download 16-bit FLAC".into(),
                        callback_data: callback_data(Quality::Standard, &track_id),
                    },
                ];
                self.messenger
                    .send_buttons(chat, "Choose quality:", &buttons)
                    .await?;
            }
            Inbound::Download {
                chat,
                request,
                status,
                callback_id,
            } => {
                if let Some(id) = callback_id {
                    self.messenger.answer_callback(&id, None).await?;
                }
                let target = ReplyTarget {
                    chat,
                    status_message: status,
                };
                self.spawn_download(request, target, tasks);
            }
        }
        Ok(())
    }

    fn spawn_download(&self, request: Request, target: ReplyTarget, tasks: &mut JoinSet<DeliveryReport>) {
        let orchestrator = Arc::clone(&self.orchestrator);
        tasks.spawn(async move { orchestrator.handle(&request, target).await });
    }

    /// Long-poll `client` and dispatch updates until `shutdown` resolves.
    ///
    /// In-flight downloads are aborted on shutdown; their workspace and child
    /// process are torn down when the tasks are dropped.
    pub async fn run(&self, client: &TelegramClient, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();
        let mut offset = 0i64;
        info!("bot started, polling for updates");

        loop {
            while let Some(finished) = tasks.try_join_next() {
                if let Err(e) = finished {
                    warn!(error = %e, "download task panicked");
                }
            }

            let updates = tokio::select! {
                _ = &mut shutdown => break,
                updates = client.get_updates(offset, self.config.poll_timeout) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed");
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(POLL_ERROR_PAUSE) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(inbound) = route(&update, self.config.default_quality) else {
                    continue;
                };
                if let Err(e) = self.dispatch(inbound, &mut tasks).await {
                    warn!(update_id = update.update_id, error = %e, "failed to handle update");
                }
            }
        }

        info!(in_flight = tasks.len(), "shutting down");
        tasks.shutdown().await;
    }
}
