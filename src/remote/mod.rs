pub mod ytdlp;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use ytdlp::YtDlpSource;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} not found, is it installed and on PATH?")]
    ToolNotFound { tool: String },
    #[error("{tool} failed for {target}: {message}")]
    ToolFailed {
        tool: String,
        target: String,
        message: String,
    },
    #[error("Unreadable playlist listing: {0}")]
    Listing(#[from] serde_json::Error),
    #[error("Download of {0} produced no audio file")]
    NoOutput(String),
}

/// One item of a remote playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub remote_id: String,
    pub url: String,
    pub title: String,
}

/// Lists a remote playlist and materializes its items as local audio files.
pub trait RemoteSource: Sync {
    fn list_entries(&self, playlist_id: &str) -> Result<Vec<RemoteEntry>, FetchError>;

    /// Download and transcode `entry` into `dest_dir`, returning the file produced.
    fn fetch(&self, entry: &RemoteEntry, dest_dir: &Path) -> Result<PathBuf, FetchError>;
}
