use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use hifibot::{BotConfig, Error, Quality};

#[derive(Parser)]
#[command(name = "hifibot", about = "Telegram bot that delivers hi-res FLAC downloads")]
struct Cli {
    /// Telegram bot token.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Bot API base URL. The token is appended directly.
    #[arg(long, env = "API_URL", default_value = hifibot::telegram::DEFAULT_API_URL)]
    api_url: String,

    /// Self-hosted Bot API server; overrides --api-url when set.
    #[arg(long, env = "LOCAL_API_URL")]
    local_api_url: Option<String>,

    /// Telegram user id allowed to run /stats (0 disables it).
    #[arg(long, env = "ADMIN_ID", default_value = "0")]
    admin_id: i64,

    /// Scratch directory for downloads. Wiped before and after every fetch.
    #[arg(long, env = "DOWNLOAD_PATH", default_value = "downloads")]
    download_dir: PathBuf,

    /// SQLite cache database.
    #[arg(long, env = "CACHE_DB", default_value = "hifi_bot.db")]
    cache_db: PathBuf,

    /// Downloader executable.
    #[arg(long, env = "FETCH_TOOL", default_value = "qobuz-dl")]
    fetch_tool: PathBuf,

    /// Give up on a download after this many seconds.
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "900")]
    fetch_timeout: u64,

    /// Give up on an upload after this many seconds.
    #[arg(long, env = "UPLOAD_TIMEOUT_SECS", default_value = "1000")]
    upload_timeout: u64,

    /// Quality for searches and non-track links (hires or standard).
    #[arg(long, env = "DEFAULT_QUALITY", default_value = "hires")]
    quality: Quality,

    /// Embed cover art into downloads.
    #[arg(long, env = "EMBED_ART", default_value = "true", action = clap::ArgAction::Set)]
    embed_art: bool,

    /// COMMENT tag written into fresh downloads. Empty disables tagging.
    #[arg(long, env = "TAG_COMMENT", default_value = "Downloaded via HiFiAudioBot")]
    tag_comment: String,

    /// Port for the health endpoint.
    #[arg(long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Long-poll timeout for getUpdates, in seconds.
    #[arg(long, env = "POLL_TIMEOUT_SECS", default_value = "30")]
    poll_timeout: u64,
}

impl Cli {
    fn into_config(self) -> BotConfig {
        let mut config = BotConfig::new()
            .api_url(self.local_api_url.unwrap_or(self.api_url))
            .admin_id(self.admin_id)
            .download_dir(self.download_dir)
            .cache_db(self.cache_db)
            .fetch_tool(self.fetch_tool)
            .fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .upload_timeout(Duration::from_secs(self.upload_timeout))
            .default_quality(self.quality)
            .embed_art(self.embed_art)
            .tag_comment(Some(self.tag_comment))
            .health_port(self.port)
            .poll_timeout(Duration::from_secs(self.poll_timeout));
        if let Some(token) = self.token {
            config = config.token(token);
        }
        config
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hifibot=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.into_config();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        tracing::info!("ctrl-c received");
    };

    match hifibot::run(config, shutdown).await {
        Ok(()) => {}
        Err(Error::MissingCredential) => {
            tracing::error!("BOT_TOKEN is not set; refusing to start");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
