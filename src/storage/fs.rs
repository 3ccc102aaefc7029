//! Scans the media root for playable video files.

use walkdir::WalkDir;

use std::{collections::HashSet, path::Path, path::PathBuf};

use crate::{config::Library, domain::fingerprint::Fingerprint};

/// Extensions the server will list and stream.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "webm", "flv", "wmv", "mpg", "mpeg", "3gp", "ogg",
];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn guess_mime(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string()
}

/// One playable library entry: where it lives, what to serve it as and
/// the fingerprint the watched store knows it by.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct VideoFile {
    pub path: PathBuf,
    pub mime: String,
    pub fingerprint: Fingerprint,
}

/// Recursively enumerates playable files under the library root, excluding
/// any whose fingerprint appears in `watched`.
///
/// The scan is read-only and never fails as a whole: unreadable directory
/// entries and files that cannot be fingerprinted are logged and skipped,
/// and a missing root simply yields an empty listing. Output is sorted by
/// path so listings are stable between passes.
pub fn scan_library(library: &Library, watched: &HashSet<Fingerprint>) -> Vec<VideoFile> {
    let root_str = library.root.to_string_lossy().into_owned();

    let walker = WalkDir::new(&library.root).follow_links(library.follow_symlinks);

    let mut videos = walker
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("error while scanning {root_str}, skipping an entry: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_video_file(path))
        .filter_map(|path| {
            match Fingerprint::from_path(&path, library.fingerprint_mtime) {
                Ok(fingerprint) => Some((path, fingerprint)),
                Err(err) => {
                    log::warn!("could not fingerprint {}: {err}", path.display());
                    None
                }
            }
        })
        .filter(|(_, fingerprint)| !watched.contains(fingerprint))
        .map(|(path, fingerprint)| VideoFile {
            mime: guess_mime(&path),
            fingerprint,
            path,
        })
        .collect::<Vec<_>>();

    videos.sort_by(|a, b| a.path.cmp(&b.path));
    videos
}
