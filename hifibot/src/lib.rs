//! Hi-res music bot: request in, lossless track delivered over Telegram out.
//!
//! **hifibot** handles the full pipeline: cache lookup (SQLite), download into
//! an exclusive scratch workspace (via an external tool such as `qobuz-dl`),
//! locating the produced FLAC, optional Vorbis comment tagging, upload and
//! cache write-back, then workspace cleanup.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> hifibot::Result<()> {
//! let config = hifibot::BotConfig::new().token("123:ABC");
//! hifibot::run(config, async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The pieces are also usable on their own: [`Orchestrator`] drives one
//! request against any [`FetchInvoker`], [`CacheGateway`] and [`Messenger`].

pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod health;
pub mod locate;
pub mod messenger;
pub mod orchestrator;
pub mod tag;
pub mod telegram;
pub mod types;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use bot::{route, Bot, Inbound};
pub use cache::{CacheGateway, SqliteCache};
pub use config::BotConfig;
pub use error::{Error, ErrorKind, Result};
pub use fetch::{FetchInvoker, FetchRequest, QobuzDl};
pub use messenger::{AudioPayload, AudioSource, Messenger};
pub use orchestrator::{DeliveryReport, DeliveryState, Orchestrator, PipelineSettings, ReplyTarget};
pub use tag::{Tagger, TrackInfo, VorbisTagger};
pub use telegram::TelegramClient;
pub use types::{CacheEntry, FetchOutcome, Quality, Request};
pub use workspace::{Workspace, WorkspaceManager};

use std::future::Future;
use std::sync::Arc;

use tracing::info;

/// Validate `config`, wire the production components and run the bot until
/// `shutdown` resolves.
///
/// Fails fast with [`Error::MissingCredential`] before touching the network
/// or disk when no token is configured.
pub async fn run(config: BotConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let token = config.validate()?.to_string();

    let cache = Arc::new(SqliteCache::open(&config.cache_db)?);
    info!(path = %config.cache_db.display(), entries = cache.count().await?, "cache ready");

    let (_, health) = health::spawn(config.health_port).await?;

    let client = TelegramClient::new(config.api_url.clone(), token);
    let messenger: Arc<dyn Messenger> = Arc::new(client.clone());

    let mut orchestrator = Orchestrator::new(
        WorkspaceManager::new(config.download_dir.clone()),
        Arc::new(QobuzDl::new(config.fetch_tool.clone())),
        cache,
        Arc::clone(&messenger),
        PipelineSettings::from(&config),
    );
    if config.tag_comment.is_some() {
        orchestrator = orchestrator.with_tagger(Arc::new(VorbisTagger));
    }

    let bot = Bot::new(config, messenger, Arc::new(orchestrator));
    bot.run(&client, shutdown).await;

    health.abort();
    Ok(())
}
