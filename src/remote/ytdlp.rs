use super::{FetchError, RemoteEntry, RemoteSource};
use crate::scanner::is_audio_file;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

/// `yt-dlp --flat-playlist --dump-single-json` output (partial).
#[derive(Debug, Deserialize)]
struct PlaylistListing {
    #[serde(default)]
    entries: Vec<Option<ListingEntry>>,
}

#[derive(Debug, Deserialize)]
struct ListingEntry {
    id: Option<String>,
    url: Option<String>,
    title: Option<String>,
}

/// Remote source backed by the `yt-dlp` command line tool.
pub struct YtDlpSource {
    binary: PathBuf,
    audio_format: String,
}

impl YtDlpSource {
    pub fn new(binary: impl Into<PathBuf>, audio_format: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            audio_format: audio_format.into(),
        }
    }

    fn tool_name(&self) -> String {
        self.binary.display().to_string()
    }

    fn run(&self, args: &[&str], target: &str) -> Result<Vec<u8>, FetchError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => FetchError::ToolNotFound {
                    tool: self.tool_name(),
                },
                _ => FetchError::Io(e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::ToolFailed {
                tool: self.tool_name(),
                target: target.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl Default for YtDlpSource {
    fn default() -> Self {
        Self::new("yt-dlp", "mp3")
    }
}

impl RemoteSource for YtDlpSource {
    fn list_entries(&self, playlist_id: &str) -> Result<Vec<RemoteEntry>, FetchError> {
        let url = playlist_url(playlist_id);
        log::info!("Listing remote playlist {url}");
        let stdout = self.run(&["--flat-playlist", "--dump-single-json", &url], &url)?;
        parse_listing(&stdout)
    }

    fn fetch(&self, entry: &RemoteEntry, dest_dir: &Path) -> Result<PathBuf, FetchError> {
        let template = dest_dir.join(format!("{}.%(ext)s", entry.remote_id));
        let template = template.to_string_lossy();
        self.run(
            &[
                "--no-playlist",
                "--quiet",
                "-x",
                "--audio-format",
                &self.audio_format,
                "-o",
                &template,
                &entry.url,
            ],
            &entry.url,
        )?;

        find_single_audio_file(dest_dir)?.ok_or_else(|| FetchError::NoOutput(entry.url.clone()))
    }
}

/// Expand a bare playlist id to a playlist URL; full URLs pass through.
pub fn playlist_url(playlist_id: &str) -> String {
    if playlist_id.contains("://") {
        playlist_id.to_string()
    } else {
        format!("https://www.youtube.com/playlist?list={playlist_id}")
    }
}

fn video_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

fn parse_listing(stdout: &[u8]) -> Result<Vec<RemoteEntry>, FetchError> {
    let listing: PlaylistListing = serde_json::from_slice(stdout)?;
    let entries = listing
        .entries
        .into_iter()
        .flatten()
        .filter_map(|e| {
            let Some(id) = e.id.filter(|id| !id.is_empty()) else {
                log::warn!("Skipping playlist item without an id");
                return None;
            };
            Some(RemoteEntry {
                url: e.url.unwrap_or_else(|| video_url(&id)),
                title: e.title.unwrap_or_else(|| id.clone()),
                remote_id: id,
            })
        })
        .collect();
    Ok(entries)
}

/// The audio file left in `dir` by a download, ignoring partial/sidecar files.
fn find_single_audio_file(dir: &Path) -> Result<Option<PathBuf>, FetchError> {
    let mut found = None;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_audio_file(&path) {
            if found.is_some() {
                log::warn!("Multiple audio files in {}, using the first", dir.display());
                break;
            }
            found = Some(path);
        }
    }
    Ok(found)
}
