use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Extensions produced by the fetch tool for lossless downloads.
pub const LOSSLESS_EXTENSIONS: &[&str] = &["flac"];

/// Find the produced audio file under `dir`.
///
/// Walks the tree recursively and keeps regular files whose extension is in
/// `extensions` (case-insensitive). When several match, the lexicographically
/// smallest full path wins, so repeated runs over the same tree always pick
/// the same file. Nothing on disk is touched.
pub fn find_artifact(dir: &Path, extensions: &[&str]) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable workspace entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_extension(path, extensions))
        .collect();

    candidates.sort();
    debug!(
        dir = %dir.display(),
        matches = candidates.len(),
        "scanned workspace for artifacts"
    );
    candidates.into_iter().next()
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}
