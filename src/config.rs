use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::dedup::{
    DuplicateIndex, DURATION_TOLERANCE_SECONDS, FINGERPRINT_DISTANCE_THRESHOLD,
    REPORT_DISTANCE_THRESHOLD,
};

/// Application configuration loaded from TOML config file.
/// Every field has a default, so the file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Library root that index/pull/verify operate on.
    pub library_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Remote playlist identifier or URL.
    pub playlist_id: Option<String>,
    /// Number of parallel probe workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Near-duplicate detection settings.
    pub dedup: DedupConfig,
    /// External tool settings.
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Maximum duration gap, in seconds, for two files to be compared.
    pub duration_tolerance_secs: f64,
    /// Fingerprint distance below which a pulled or indexed file is a duplicate.
    pub link_threshold: usize,
    /// Fingerprint distance below which the dedup report lists a pair.
    pub report_threshold: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: DURATION_TOLERANCE_SECONDS,
            link_threshold: FINGERPRINT_DISTANCE_THRESHOLD,
            report_threshold: REPORT_DISTANCE_THRESHOLD,
        }
    }
}

impl DedupConfig {
    /// Index used by the index and pull passes.
    pub fn link_index(&self) -> DuplicateIndex {
        DuplicateIndex::new(self.duration_tolerance_secs, self.link_threshold)
    }

    /// Index used by the full-library report.
    pub fn report_index(&self) -> DuplicateIndex {
        DuplicateIndex::new(self.duration_tolerance_secs, self.report_threshold)
    }

    /// Copy with the `dedup` command's report threshold and tolerance applied.
    pub fn with_report_overrides(&self, threshold: Option<usize>, tolerance: Option<f64>) -> Self {
        Self {
            report_threshold: threshold.unwrap_or(self.report_threshold),
            duration_tolerance_secs: tolerance.unwrap_or(self.duration_tolerance_secs),
            ..*self
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Chromaprint fingerprinter binary.
    pub fpcalc: PathBuf,
    /// Playlist listing / download binary.
    pub yt_dlp: PathBuf,
    /// Container downloads are transcoded to.
    pub audio_format: String,
    /// Concurrent downloads during pull.
    pub fetch_workers: usize,
    /// Where per-item download directories are created (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fpcalc: PathBuf::from("fpcalc"),
            yt_dlp: PathBuf::from("yt-dlp"),
            audio_format: "mp3".to_string(),
            fetch_workers: 4,
            temp_dir: None,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/mpsync/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path, falling back to defaults on error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("mpsync.db")
    } else {
        // Fallback: current directory
        PathBuf::from("mpsync.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.library_dir.is_none());
        assert_eq!(config.dedup.duration_tolerance_secs, 5.0);
        assert!(config.dedup.link_threshold < config.dedup.report_threshold);
        assert_eq!(config.tools.fetch_workers, 4);
        assert!(config.resolve_workers() >= 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            library_dir = "/music"
            playlist_id = "PLabc"
            workers = 3

            [dedup]
            link_threshold = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.library_dir.as_deref(), Some(Path::new("/music")));
        assert_eq!(config.playlist_id.as_deref(), Some("PLabc"));
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.dedup.link_threshold, 50);
        assert_eq!(config.dedup.report_threshold, REPORT_DISTANCE_THRESHOLD);
        assert_eq!(config.tools.yt_dlp, PathBuf::from("yt-dlp"));
    }

    #[test]
    fn test_unparsable_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();
        let config = AppConfig::load_from(&path);
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn test_indexes_use_their_thresholds() {
        let dedup = DedupConfig::default();
        assert_eq!(dedup.link_index().threshold(), FINGERPRINT_DISTANCE_THRESHOLD);
        assert_eq!(dedup.report_index().threshold(), REPORT_DISTANCE_THRESHOLD);
        assert_eq!(dedup.link_index().tolerance_secs(), 5.0);
    }

    #[test]
    fn test_report_overrides() {
        let dedup = DedupConfig::default();
        let unchanged = dedup.with_report_overrides(None, None).report_index();
        assert_eq!(unchanged.threshold(), REPORT_DISTANCE_THRESHOLD);
        assert_eq!(unchanged.tolerance_secs(), 5.0);

        let tuned = dedup.with_report_overrides(Some(250), Some(2.5));
        assert_eq!(tuned.report_index().threshold(), 250);
        assert_eq!(tuned.report_index().tolerance_secs(), 2.5);
        // Linking is not affected by report overrides
        assert_eq!(tuned.link_threshold, FINGERPRINT_DISTANCE_THRESHOLD);
    }
}
