//! Reconciliation passes between the catalog, the library directory and
//! the remote playlist.
//!
//! Every pass follows the same shape: expensive per-item work (probing,
//! downloading) runs on a rayon pool in bounded chunks, and every catalog
//! read-then-write runs serially on the calling thread. That serial loop is
//! the only writer, so a duplicate check and the write that depends on it
//! can never interleave with another item's.

pub mod index;
pub mod pull;
pub mod verify;

use crate::db::{Database, DbError};
use crate::dedup::DuplicateIndex;
use crate::probe::{MediaProbe, ProbeError};
use crate::remote::{FetchError, RemoteSource};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use index::IndexResult;
pub use pull::PullResult;
pub use verify::VerifyResult;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),
    #[error("Remote error: {0}")]
    Fetch(#[from] FetchError),
}

impl SyncError {
    /// Whether this error ends the whole pass rather than just the current item.
    ///
    /// Constraint violations and per-file probe/download/IO failures are
    /// item-level. Anything that means the catalog itself is unusable, or
    /// that a row vanished under us, is fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Configuration(_) => true,
            SyncError::Db(DbError::ConstraintViolation { .. }) => false,
            SyncError::Db(_) => true,
            SyncError::Io(_) | SyncError::Probe(_) | SyncError::Fetch(_) => false,
        }
    }
}

/// Tunables shared by all passes.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Root all catalog filepaths are relative to.
    pub library_dir: PathBuf,
    /// Parallel probe workers for the index and verify passes.
    pub workers: usize,
    /// Concurrent downloads during pull.
    pub fetch_workers: usize,
    /// Parent for per-item download directories (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
    /// Near-duplicate rule applied when indexing and pulling.
    pub duplicates: DuplicateIndex,
}

impl SyncSettings {
    pub fn new(library_dir: impl Into<PathBuf>) -> Self {
        Self {
            library_dir: library_dir.into(),
            workers: 1,
            fetch_workers: 4,
            temp_dir: None,
            duplicates: DuplicateIndex::default(),
        }
    }
}

/// Outcome of running verify, index and pull back to back.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub verify: VerifyResult,
    pub index: IndexResult,
    pub pull: PullResult,
}

/// Drives the verify, index and pull passes against one catalog.
pub struct Reconciler<'a, P: MediaProbe + ?Sized, R: RemoteSource + ?Sized> {
    db: &'a Database,
    probe: &'a P,
    remote: &'a R,
    settings: SyncSettings,
}

impl<'a, P: MediaProbe + ?Sized, R: RemoteSource + ?Sized> Reconciler<'a, P, R> {
    pub fn new(db: &'a Database, probe: &'a P, remote: &'a R, settings: SyncSettings) -> Self {
        Self {
            db,
            probe,
            remote,
            settings,
        }
    }

    /// verify, then index, then pull.
    pub fn sync(&self, playlist_id: &str, refresh: bool) -> Result<SyncReport, SyncError> {
        let verify = self.verify(refresh)?;
        let index = self.index()?;
        let pull = self.pull(playlist_id)?;
        Ok(SyncReport {
            verify,
            index,
            pull,
        })
    }

    /// The library root, which must already exist for passes that read it.
    ///
    /// A missing root would make verify delete every entry, so it is a
    /// configuration error rather than an empty library.
    fn existing_library_root(&self) -> Result<&Path, SyncError> {
        let root = self.settings.library_dir.as_path();
        if root.is_dir() {
            Ok(root)
        } else {
            Err(SyncError::Configuration(format!(
                "library directory {} does not exist",
                root.display()
            )))
        }
    }

    fn worker_pool(threads: usize) -> Result<rayon::ThreadPool, SyncError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()
            .map_err(|e| SyncError::Configuration(format!("could not start worker pool: {e}")))
    }
}

/// Playlist to pull: an explicit id wins and is remembered in the catalog,
/// otherwise the one stored by a previous run.
pub fn resolve_playlist_id(db: &Database, explicit: Option<&str>) -> Result<String, SyncError> {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        if db.playlist_id()?.as_deref() != Some(id) {
            log::info!("Remembering playlist {id}");
            db.set_playlist_id(id)?;
        }
        return Ok(id.to_string());
    }
    db.playlist_id()?.ok_or_else(|| {
        SyncError::Configuration(
            "no playlist id given and none stored in the catalog (use --playlist)".into(),
        )
    })
}

fn progress_bar(len: usize, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::with_template(&format!(
            "{{spinner:.green}} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} ({{eta}}) {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    pb
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process stand-ins for the external tools.
    //!
    //! Test "audio" files are small text files of `key=value` lines:
    //! `fp`, `duration` and optionally `rating`. The content hash is the
    //! real SHA-256 of the bytes.

    use super::*;
    use crate::probe::tools::hash_file;
    use crate::remote::RemoteEntry;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub fn audio(fp: &str, duration: f64) -> String {
        format!("fp={fp}\nduration={duration}\n")
    }

    pub fn rated(fp: &str, duration: f64, rating: f64) -> String {
        format!("fp={fp}\nduration={duration}\nrating={rating}\n")
    }

    pub fn write(root: &Path, rel: &str, contents: &str) -> PathBuf {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub struct FakeProbe;

    impl FakeProbe {
        fn field(path: &Path, key: &str) -> Result<Option<String>, ProbeError> {
            let text = std::fs::read_to_string(path)?;
            Ok(text.lines().find_map(|line| {
                line.strip_prefix(key)
                    .and_then(|rest| rest.strip_prefix('='))
                    .map(str::to_string)
            }))
        }

        fn invalid(path: &Path, message: &str) -> ProbeError {
            ProbeError::InvalidOutput {
                tool: "fake".into(),
                message: format!("{}: {message}", path.display()),
            }
        }
    }

    impl MediaProbe for FakeProbe {
        fn fingerprint(&self, path: &Path) -> Result<String, ProbeError> {
            Self::field(path, "fp")?.ok_or_else(|| Self::invalid(path, "no fingerprint"))
        }

        fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
            Self::field(path, "duration")?
                .and_then(|d| d.parse().ok())
                .ok_or_else(|| ProbeError::NoDuration(path.display().to_string()))
        }

        fn content_hash(&self, path: &Path) -> Result<String, ProbeError> {
            hash_file(path)
        }

        fn rating(&self, path: &Path) -> Result<Option<f64>, ProbeError> {
            Ok(Self::field(path, "rating")?.and_then(|r| r.parse().ok()))
        }
    }

    /// Playlist served from memory; `fetch` writes `<id>.mp3` into the destination.
    pub struct FakeRemote {
        pub items: Vec<(RemoteEntry, String)>,
        pub failing: HashSet<String>,
        pub fetch_dirs: Mutex<Vec<PathBuf>>,
        pub fetches: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        pub fn new(items: &[(&str, &str, String)]) -> Self {
            Self {
                items: items
                    .iter()
                    .map(|(id, title, contents)| {
                        (
                            RemoteEntry {
                                remote_id: id.to_string(),
                                url: format!("https://remote.test/{id}"),
                                title: title.to_string(),
                            },
                            contents.clone(),
                        )
                    })
                    .collect(),
                failing: HashSet::new(),
                fetch_dirs: Mutex::new(Vec::new()),
                fetches: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(mut self, remote_id: &str) -> Self {
            self.failing.insert(remote_id.to_string());
            self
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.lock().unwrap().len()
        }
    }

    impl RemoteSource for FakeRemote {
        fn list_entries(&self, _playlist_id: &str) -> Result<Vec<RemoteEntry>, FetchError> {
            Ok(self.items.iter().map(|(e, _)| e.clone()).collect())
        }

        fn fetch(&self, entry: &RemoteEntry, dest_dir: &Path) -> Result<PathBuf, FetchError> {
            self.fetches.lock().unwrap().push(entry.remote_id.clone());
            self.fetch_dirs.lock().unwrap().push(dest_dir.to_path_buf());
            if self.failing.contains(&entry.remote_id) {
                return Err(FetchError::ToolFailed {
                    tool: "fake".into(),
                    target: entry.url.clone(),
                    message: "HTTP Error 403".into(),
                });
            }
            let (_, contents) = self
                .items
                .iter()
                .find(|(e, _)| e.remote_id == entry.remote_id)
                .ok_or_else(|| FetchError::NoOutput(entry.url.clone()))?;
            let path = dest_dir.join(format!("{}.mp3", entry.remote_id));
            std::fs::write(&path, contents)?;
            Ok(path)
        }
    }

    /// A library directory, a scratch temp root and an in-memory catalog.
    pub struct Fixture {
        pub library: TempDir,
        pub scratch: TempDir,
        pub db: Database,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                library: TempDir::new().unwrap(),
                scratch: TempDir::new().unwrap(),
                db: Database::open_in_memory().unwrap(),
            }
        }

        pub fn root(&self) -> &Path {
            self.library.path()
        }

        pub fn settings(&self) -> SyncSettings {
            SyncSettings {
                workers: 2,
                fetch_workers: 2,
                temp_dir: Some(self.scratch.path().to_path_buf()),
                ..SyncSettings::new(self.library.path())
            }
        }

        pub fn reconciler<'a>(
            &'a self,
            remote: &'a FakeRemote,
        ) -> Reconciler<'a, FakeProbe, FakeRemote> {
            Reconciler::new(&self.db, &FakeProbe, remote, self.settings())
        }

        /// Entries left in the scratch temp root.
        pub fn scratch_leftovers(&self) -> usize {
            std::fs::read_dir(self.scratch.path()).unwrap().count()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_resolve_playlist_prefers_explicit_and_remembers_it() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(resolve_playlist_id(&db, Some("PLone")).unwrap(), "PLone");
        assert_eq!(db.playlist_id().unwrap().as_deref(), Some("PLone"));

        assert_eq!(resolve_playlist_id(&db, None).unwrap(), "PLone");
        assert_eq!(resolve_playlist_id(&db, Some("PLtwo")).unwrap(), "PLtwo");
        assert_eq!(resolve_playlist_id(&db, None).unwrap(), "PLtwo");
    }

    #[test]
    fn test_resolve_playlist_missing_is_configuration_error() {
        let db = Database::open_in_memory().unwrap();
        let err = resolve_playlist_id(&db, None).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
        let err = resolve_playlist_id(&db, Some("  ")).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn test_missing_library_root_is_fatal() {
        let fx = Fixture::new();
        let remote = FakeRemote::new(&[]);
        let settings = SyncSettings::new(fx.root().join("not-mounted"));
        let rec = Reconciler::new(&fx.db, &FakeProbe, &remote, settings);

        assert!(matches!(rec.verify(false), Err(SyncError::Configuration(_))));
        assert!(matches!(rec.index(), Err(SyncError::Configuration(_))));
    }

    #[test]
    fn test_error_fatality() {
        assert!(SyncError::Configuration("x".into()).is_fatal());
        assert!(SyncError::Db(DbError::NotFound(1)).is_fatal());
        assert!(!SyncError::Db(DbError::ConstraintViolation {
            field: crate::db::models::UniqueField::ContentHash,
            value: "abc".into(),
        })
        .is_fatal());
        assert!(!SyncError::Probe(ProbeError::NoDuration("a.mp3".into())).is_fatal());
        assert!(!SyncError::Fetch(FetchError::NoOutput("u".into())).is_fatal());
    }

    #[test]
    fn test_sync_runs_all_passes() {
        let fx = Fixture::new();
        write(fx.root(), "local.mp3", &audio("LOCALFP", 100.0));
        fx.db
            .insert(&crate::db::models::NewEntry {
                fingerprint: "GONE".into(),
                content_hash: "gone".into(),
                remote_id: None,
                filepath: "gone.mp3".into(),
                duration: 50.0,
                rating: None,
            })
            .unwrap();
        let remote = FakeRemote::new(&[("r1", "Remote Song", audio("REMOTEFP", 200.0))]);

        let report = fx.reconciler(&remote).sync("PL", false).unwrap();
        assert_eq!(report.verify.deleted, 1);
        assert_eq!(report.index.inserted, 1);
        assert_eq!(report.pull.inserted, 1);
        assert_eq!(fx.db.count_entries().unwrap(), 2);
    }
}
