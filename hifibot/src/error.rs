use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// All errors that can occur in hifibot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bot token missing: set BOT_TOKEN")]
    MissingCredential,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("workspace I/O error at {path}: {source}")]
    WorkspaceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    #[error("fetch tool not found: {0}")]
    FetchToolNotFound(String),

    #[error("fetch tool failed (exit code {code:?}): {stderr}")]
    FetchProcess { code: Option<i32>, stderr: String },

    #[error("no audio file found in {dir}")]
    ArtifactNotFound { dir: PathBuf },

    #[error("delivery failed: {0}")]
    DeliveryTransport(String),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("cache write failed: {0}")]
    CacheWrite(String),

    #[error("cache entry already exists for key {0}")]
    DuplicateKey(String),

    #[error("{stage} timed out after {}s", .after.as_secs())]
    Timeout { stage: &'static str, after: Duration },

    #[error("tagging failed: {0}")]
    Tagging(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Coarse classification of an [`Error`], used in delivery reports and
/// user-facing failure notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingCredential,
    WorkspaceIo,
    FetchProcess,
    ArtifactNotFound,
    DeliveryTransport,
    CacheWrite,
    Timeout,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingCredential => ErrorKind::MissingCredential,
            Error::WorkspaceIo { .. } => ErrorKind::WorkspaceIo,
            Error::InvalidLocator(_)
            | Error::FetchToolNotFound(_)
            | Error::FetchProcess { .. } => ErrorKind::FetchProcess,
            Error::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
            Error::DeliveryTransport(_) | Error::Telegram(_) | Error::Http(_) => {
                ErrorKind::DeliveryTransport
            }
            Error::CacheWrite(_) | Error::DuplicateKey(_) | Error::Database(_) => {
                ErrorKind::CacheWrite
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::InvalidConfig(_)
            | Error::Tagging(_)
            | Error::Io(_)
            | Error::Json(_) => ErrorKind::Internal,
        }
    }
}

impl From<metaflac::Error> for Error {
    fn from(e: metaflac::Error) -> Self {
        Error::Tagging(e.to_string())
    }
}

impl ErrorKind {
    /// Short notice shown to the user when a request ends in this state.
    pub fn user_notice(self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => "Bot is misconfigured.",
            ErrorKind::WorkspaceIo => "Server storage error, please try again later.",
            ErrorKind::FetchProcess => "Download failed.",
            ErrorKind::ArtifactNotFound => "Download finished but no audio file was produced.",
            ErrorKind::DeliveryTransport => "Could not send the file.",
            ErrorKind::CacheWrite => "Cache error.",
            ErrorKind::Timeout => "Download timed out.",
            ErrorKind::Internal => "Something went wrong.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::WorkspaceIo => "workspace_io",
            ErrorKind::FetchProcess => "fetch_process",
            ErrorKind::ArtifactNotFound => "artifact_not_found",
            ErrorKind::DeliveryTransport => "delivery_transport",
            ErrorKind::CacheWrite => "cache_write",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
