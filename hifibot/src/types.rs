use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Requested fidelity tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// 16-bit / 44.1 kHz lossless.
    Standard,
    /// 24-bit, highest sample rate available.
    #[default]
    HiRes,
}

impl Quality {
    /// Quality parameter understood by qobuz-dl (`-q`).
    pub fn fetch_flag(self) -> &'static str {
        match self {
            Quality::Standard => "6",
            Quality::HiRes => "27",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::HiRes => "hires",
        }
    }

    /// Human-readable label for captions.
    pub fn label(self) -> &'static str {
        match self {
            Quality::Standard => "16-bit / 44.1kHz",
            Quality::HiRes => "24-bit Hi-Res",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "std" | "cd" | "16" | "16bit" | "6" => Ok(Quality::Standard),
            "hires" | "hi-res" | "24" | "24bit" | "27" => Ok(Quality::HiRes),
            other => Err(Error::InvalidConfig(format!("unknown quality: {other}"))),
        }
    }
}

/// One user-initiated fetch intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// URL or free-text search term.
    pub locator: String,
    pub quality: Quality,
}

impl Request {
    pub fn new(locator: impl Into<String>, quality: Quality) -> Self {
        Self {
            locator: locator.into(),
            quality,
        }
    }

    /// Whether the locator is a URL rather than a search term.
    pub fn is_url(&self) -> bool {
        is_url(&self.locator)
    }

    /// Cache key for this request.
    ///
    /// Qobuz URLs are keyed by their numeric/alphanumeric id so the same track
    /// reached through different URL shapes shares one entry. Anything else
    /// is keyed by its normalized text. The quality tier is always part of
    /// the key.
    pub fn cache_key(&self) -> String {
        let identity = match qobuz_id(&self.locator) {
            Some((kind, id)) => format!("qobuz:{kind}:{id}"),
            None => format!("query:{}", normalize_query(&self.locator)),
        };
        format!("{identity}@{}", self.quality)
    }
}

/// Durable record that a key has already been delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    /// Messaging-platform file id usable to re-send without uploading.
    pub remote_file_ref: String,
    pub quality: Quality,
    pub created_at: DateTime<Utc>,
}

/// Result of one fetch tool invocation.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl FetchOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

pub(crate) fn is_url(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.starts_with("https://") || trimmed.starts_with("http://")
}

/// Extract `(kind, id)` from a Qobuz track or album link.
///
/// Accepts `https://open.qobuz.com/track/123`, `https://www.qobuz.com/us-en/album/name/abc123`,
/// and scheme-less forms like `qobuz.com/track/555`.
pub fn qobuz_id(locator: &str) -> Option<(&'static str, String)> {
    let trimmed = locator.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    let (host, path) = without_scheme.split_once('/')?;
    if !(host == "qobuz.com" || host.ends_with(".qobuz.com")) {
        return None;
    }

    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    for (i, seg) in segments.iter().enumerate() {
        let kind = match *seg {
            "track" => "track",
            "album" => "album",
            _ => continue,
        };
        // The id is the last path segment after the kind marker
        // (album URLs may carry a slug before the id).
        let id = segments[i + 1..].last()?;
        if id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some((kind, id.to_string()));
        }
        return None;
    }
    None
}

fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
