pub mod filename;
pub mod metadata;

use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Whether `path` has a recognized audio extension.
pub fn is_audio_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

/// All audio files under `root`, sorted. Hidden files and directories are skipped.
pub fn collect_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::warn!("Skipping unreadable path: {err}");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

/// Catalog filepath for `path`: relative to `root`, `/`-separated.
///
/// `None` when `path` is outside `root` or any component is not valid UTF-8,
/// since such a name could not be turned back into the same path.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts = rel
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<&str>>>()?;
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Absolute location of a catalog filepath under `root`.
pub fn absolute_path(root: &Path, filepath: &str) -> PathBuf {
    filepath.split('/').fold(root.to_path_buf(), |acc, part| acc.join(part))
}
