use std::path::Path;

use async_trait::async_trait;
use metaflac::block::VorbisComment;
use tracing::debug;

use crate::error::{Error, Result};

/// Title and performer shown with a delivered file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub performer: Option<String>,
}

/// First value for `key` (case-insensitive, as Vorbis comment keys are).
fn comment<'a>(comments: &'a VorbisComment, key: &str) -> Option<&'a str> {
    comments
        .comments
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .and_then(|(_, values)| values.first())
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Replace every value of `key`, whatever case it was stored under.
fn set_comment(comments: &mut VorbisComment, key: &str, value: &str) {
    comments.comments.retain(|k, _| !k.eq_ignore_ascii_case(key));
    comments
        .comments
        .insert(key.to_string(), vec![value.to_string()]);
}

/// Read title and performer from a FLAC file's Vorbis comments.
///
/// Missing fields are `None`; a file that is not FLAC is an error.
pub fn read_track_info(path: &Path) -> Result<TrackInfo> {
    let tag = metaflac::Tag::read_from_path(path)?;
    let Some(comments) = tag.vorbis_comments() else {
        return Ok(TrackInfo::default());
    };
    Ok(TrackInfo {
        title: comment(comments, "TITLE").map(str::to_string),
        performer: comment(comments, "ARTIST")
            .or_else(|| comment(comments, "ALBUMARTIST"))
            .map(str::to_string),
    })
}

/// Work out title and performer for a located artifact.
///
/// Embedded tags win. Otherwise the title comes from the file name with any
/// leading track number removed, and the performer from the artist folder
/// (`<root>/<artist>/<album>/<file>`), if the file sits that deep.
pub fn describe(path: &Path, root: &Path) -> TrackInfo {
    let tags = match read_track_info(path) {
        Ok(tags) => tags,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "could not read tags");
            TrackInfo::default()
        }
    };

    TrackInfo {
        title: tags.title.or_else(|| title_from_file_name(path)),
        performer: tags.performer.or_else(|| artist_from_folders(path, root)),
    }
}

fn title_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?.trim();
    let without_number = stem.trim_start_matches(|c: char| c.is_ascii_digit());
    let title = if without_number.len() == stem.len() {
        stem
    } else {
        without_number.trim_start_matches([' ', '.', '-', '_'])
    };
    if title.is_empty() {
        Some(stem.to_string())
    } else {
        Some(title.to_string())
    }
}

fn artist_from_folders(path: &Path, root: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative.components().collect();
    if parts.len() < 3 {
        return None;
    }
    parts[0].as_os_str().to_str().map(str::to_string)
}

/// Post-processing step that writes tags into a fetched file before upload.
#[async_trait]
pub trait Tagger: Send + Sync {
    async fn tag(&self, path: &Path, info: &TrackInfo, comment: &str) -> Result<()>;
}

/// Writes Vorbis comments in-process.
///
/// COMMENT is always replaced. TITLE and ARTIST are only filled in when the
/// file has none, so tags from the store are never overwritten.
#[derive(Debug, Clone, Copy, Default)]
pub struct VorbisTagger;

impl VorbisTagger {
    fn write(path: &Path, info: &TrackInfo, text: &str) -> Result<()> {
        let mut tag = metaflac::Tag::read_from_path(path)?;
        let comments = tag.vorbis_comments_mut();

        if let Some(title) = &info.title {
            if comment(comments, "TITLE").is_none() {
                set_comment(comments, "TITLE", title);
            }
        }
        if let Some(performer) = &info.performer {
            if comment(comments, "ARTIST").is_none() {
                set_comment(comments, "ARTIST", performer);
            }
        }
        set_comment(comments, "COMMENT", text);

        tag.write_to_path(path)?;
        Ok(())
    }
}

#[async_trait]
impl Tagger for VorbisTagger {
    async fn tag(&self, path: &Path, info: &TrackInfo, comment: &str) -> Result<()> {
        let (file, info, text) = (path.to_path_buf(), info.clone(), comment.to_string());
        tokio::task::spawn_blocking(move || Self::write(&file, &info, &text))
            .await
            .map_err(|e| Error::Tagging(e.to_string()))??;

        debug!(path = %path.display(), "tags written");
        Ok(())
    }
}
