pub mod tools;

use crate::db::models::{round_duration, NewEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use tools::ToolProbe;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{tool} not found, is it installed and on PATH?")]
    ToolNotFound { tool: String },
    #[error("{tool} failed on {path}: {message}")]
    ToolFailed {
        tool: String,
        path: String,
        message: String,
    },
    #[error("Unreadable output from {tool}: {message}")]
    InvalidOutput { tool: String, message: String },
    #[error("Could not read tags from {path}: {message}")]
    Tags { path: String, message: String },
    #[error("No duration available for {0}")]
    NoDuration(String),
}

/// Extracts the acoustic properties the catalog needs from a local file.
///
/// Implementations own all command construction and escaping; callers only
/// pass paths.
pub trait MediaProbe: Sync {
    fn fingerprint(&self, path: &Path) -> Result<String, ProbeError>;
    fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
    fn content_hash(&self, path: &Path) -> Result<String, ProbeError>;
    /// `None` when the file carries no rating metadata.
    fn rating(&self, path: &Path) -> Result<Option<f64>, ProbeError>;
}

/// Every probed property of one file, computed once and frozen.
///
/// Built on a worker thread and then moved to the writer, so nothing is
/// recomputed or mutated after construction.
#[derive(Debug, Clone)]
pub struct ProbedAudio {
    pub path: PathBuf,
    pub fingerprint: String,
    /// Seconds, rounded to two decimal places.
    pub duration: f64,
    pub content_hash: String,
    pub rating: Option<f64>,
}

impl ProbedAudio {
    pub fn probe<P: MediaProbe + ?Sized>(probe: &P, path: &Path) -> Result<Self, ProbeError> {
        log::debug!(
            "Probing: {}",
            path.file_name().and_then(|f| f.to_str()).unwrap_or("?")
        );
        Ok(Self {
            path: path.to_path_buf(),
            fingerprint: probe.fingerprint(path)?,
            duration: round_duration(probe.duration(path)?),
            content_hash: probe.content_hash(path)?,
            rating: probe.rating(path)?,
        })
    }

    /// Catalog row for this file stored at `filepath` (relative to the library root).
    pub fn to_new_entry(&self, filepath: String, remote_id: Option<String>) -> NewEntry {
        NewEntry {
            fingerprint: self.fingerprint.clone(),
            content_hash: self.content_hash.clone(),
            remote_id,
            filepath,
            duration: self.duration,
            rating: self.rating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe;

    impl MediaProbe for FixedProbe {
        fn fingerprint(&self, _path: &Path) -> Result<String, ProbeError> {
            Ok("AQADtNIy".into())
        }
        fn duration(&self, _path: &Path) -> Result<f64, ProbeError> {
            Ok(180.126)
        }
        fn content_hash(&self, _path: &Path) -> Result<String, ProbeError> {
            Ok("abc123".into())
        }
        fn rating(&self, _path: &Path) -> Result<Option<f64>, ProbeError> {
            Ok(None)
        }
    }

    struct BrokenProbe;

    impl MediaProbe for BrokenProbe {
        fn fingerprint(&self, path: &Path) -> Result<String, ProbeError> {
            Err(ProbeError::ToolFailed {
                tool: "fpcalc".into(),
                path: path.display().to_string(),
                message: "corrupt stream".into(),
            })
        }
        fn duration(&self, _path: &Path) -> Result<f64, ProbeError> {
            Ok(1.0)
        }
        fn content_hash(&self, _path: &Path) -> Result<String, ProbeError> {
            Ok("x".into())
        }
        fn rating(&self, _path: &Path) -> Result<Option<f64>, ProbeError> {
            Ok(None)
        }
    }

    #[test]
    fn test_probe_rounds_duration() {
        let probed = ProbedAudio::probe(&FixedProbe, Path::new("song.mp3")).unwrap();
        assert_eq!(probed.duration, 180.13);
        assert_eq!(probed.fingerprint, "AQADtNIy");

        let entry = probed.to_new_entry("song.mp3".into(), Some("yt-1".into()));
        assert_eq!(entry.filepath, "song.mp3");
        assert_eq!(entry.remote_id.as_deref(), Some("yt-1"));
        assert_eq!(entry.duration, 180.13);
    }

    #[test]
    fn test_probe_failure_propagates() {
        let err = ProbedAudio::probe(&BrokenProbe, Path::new("bad.mp3")).unwrap_err();
        assert!(err.to_string().contains("corrupt stream"));
    }
}
