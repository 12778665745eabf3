use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::telegram::DEFAULT_API_URL;
use crate::types::Quality;

/// Runtime configuration for the bot.
///
/// Built with consuming setters and checked once with [`BotConfig::validate`]
/// before anything starts.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Bot API token. Required.
    pub token: Option<String>,
    /// Bot API base URL; the token is appended directly.
    pub api_url: String,
    /// Telegram user id allowed to run admin commands (0 disables them).
    pub admin_id: i64,
    /// Scratch directory the fetch tool writes into.
    pub download_dir: PathBuf,
    /// SQLite file holding the delivered-track cache.
    pub cache_db: PathBuf,
    /// Fetch tool executable.
    pub fetch_tool: PathBuf,
    pub fetch_timeout: Duration,
    pub upload_timeout: Duration,
    pub default_quality: Quality,
    /// Ask the fetch tool to embed cover art.
    pub embed_art: bool,
    /// COMMENT tag written into fresh downloads; `None` skips tagging.
    pub tag_comment: Option<String>,
    pub health_port: u16,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            admin_id: 0,
            download_dir: PathBuf::from("downloads"),
            cache_db: PathBuf::from("hifi_bot.db"),
            fetch_tool: PathBuf::from("qobuz-dl"),
            fetch_timeout: Duration::from_secs(900),
            upload_timeout: Duration::from_secs(1000),
            default_quality: Quality::HiRes,
            embed_art: true,
            tag_comment: Some("Downloaded via HiFiAudioBot".to_string()),
            health_port: 8000,
            poll_timeout: Duration::from_secs(30),
        }
    }
}

impl BotConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn admin_id(mut self, id: i64) -> Self {
        self.admin_id = id;
        self
    }

    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn cache_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_db = path.into();
        self
    }

    pub fn fetch_tool(mut self, program: impl Into<PathBuf>) -> Self {
        self.fetch_tool = program.into();
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.upload_timeout = timeout;
        self
    }

    pub fn default_quality(mut self, quality: Quality) -> Self {
        self.default_quality = quality;
        self
    }

    pub fn embed_art(mut self, enabled: bool) -> Self {
        self.embed_art = enabled;
        self
    }

    /// Set the COMMENT tag; an empty string disables tagging.
    pub fn tag_comment(mut self, comment: Option<String>) -> Self {
        self.tag_comment = comment.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Check the configuration and return the bot token.
    ///
    /// A missing or blank token is [`Error::MissingCredential`]; the caller is
    /// expected to abort startup on it.
    pub fn validate(&self) -> Result<&str> {
        let token = self
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingCredential)?;

        if self.api_url.trim().is_empty() {
            return Err(Error::InvalidConfig("API URL must not be empty".into()));
        }
        if self.fetch_tool.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("fetch tool must not be empty".into()));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("download directory must not be empty".into()));
        }
        if self.fetch_timeout.is_zero() || self.upload_timeout.is_zero() {
            return Err(Error::InvalidConfig("timeouts must be greater than zero".into()));
        }
        Ok(token)
    }

    /// Whether `user_id` may run admin commands.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_id != 0 && self.admin_id == user_id
    }
}
