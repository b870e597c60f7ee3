use super::{progress_bar, Reconciler, SyncError};
use crate::db::models::EntryUpdate;
use crate::db::{Database, DbError};
use crate::probe::{MediaProbe, ProbedAudio};
use crate::remote::{RemoteEntry, RemoteSource};
use crate::scanner::filename::{move_file, resolve_collision_with, sanitize_filename};
use crate::scanner::relative_path;
use rayon::prelude::*;
use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;
use tempfile::TempDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PullResult {
    /// Items in the remote listing.
    pub listed: u64,
    /// Items already linked to an entry, directly or by alias.
    pub known: u64,
    /// Downloads stored in the library as new entries.
    pub inserted: u64,
    /// Downloads matching an unlinked entry, which now carries their remote id.
    pub linked: u64,
    /// Downloads matching an entry already linked to another remote item.
    pub aliased: u64,
    /// Downloads rejected by a uniqueness constraint.
    pub skipped: u64,
    pub errors: u64,
}

/// A fetched and probed remote item, still sitting in its scratch directory.
struct Download {
    scratch: TempDir,
    audio: ProbedAudio,
}

enum Pulled {
    Inserted { id: i64, filepath: String },
    Linked { id: i64, distance: usize },
    Aliased { id: i64, linked_to: String },
}

impl<P: MediaProbe + ?Sized, R: RemoteSource + ?Sized> Reconciler<'_, P, R> {
    /// Download every remote item with no catalog entry and either link it to
    /// an existing near-duplicate or store it in the library.
    pub fn pull(&self, playlist_id: &str) -> Result<PullResult, SyncError> {
        let root = self.settings.library_dir.as_path();
        std::fs::create_dir_all(root)?;
        if let Some(temp) = &self.settings.temp_dir {
            std::fs::create_dir_all(temp)?;
        }

        // A listing failure leaves nothing to reconcile against
        let listing = self.remote.list_entries(playlist_id)?;
        let mut result = PullResult {
            listed: listing.len() as u64,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for item in listing {
            if !seen.insert(item.remote_id.clone()) {
                log::debug!("Playlist lists {} more than once", item.remote_id);
                result.known += 1;
            } else if self.db.remote_id_known(&item.remote_id)? {
                result.known += 1;
            } else {
                pending.push(item);
            }
        }

        if pending.is_empty() {
            log::info!("Nothing to pull ({} items already catalogued)", result.known);
            return Ok(result);
        }

        let workers = self.settings.fetch_workers.max(1);
        log::info!("Pulling {} new items with {} downloads in flight", pending.len(), workers);

        let pool = Self::worker_pool(workers)?;
        let remote = self.remote;
        let probe = self.probe;
        let temp_root = self.settings.temp_dir.as_deref();
        let pb = progress_bar(pending.len(), "items");

        for chunk in pending.chunks(workers) {
            let downloads: Vec<Result<Download, SyncError>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|item| {
                        pb.set_message(item.title.clone());
                        let download = download(remote, probe, item, temp_root);
                        pb.inc(1);
                        download
                    })
                    .collect()
            });

            for (item, download) in chunk.iter().zip(downloads) {
                let outcome = download.and_then(|d| self.settle(root, item, d));
                match outcome {
                    Ok(Pulled::Inserted { id, filepath }) => {
                        log::info!("Added {} as {filepath} (entry {id})", item.remote_id);
                        result.inserted += 1;
                    }
                    Ok(Pulled::Linked { id, distance }) => {
                        log::info!(
                            "Linked {} to existing entry {id} (distance {distance})",
                            item.remote_id
                        );
                        result.linked += 1;
                    }
                    Ok(Pulled::Aliased { id, linked_to }) => {
                        log::info!(
                            "{} duplicates entry {id}, already linked to {linked_to}",
                            item.remote_id
                        );
                        result.aliased += 1;
                    }
                    Err(SyncError::Db(DbError::ConstraintViolation { field, value })) => {
                        log::info!("Not storing {}: {field} {value} already catalogued", item.remote_id);
                        result.skipped += 1;
                    }
                    Err(e) if e.is_fatal() => {
                        pb.abandon();
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("Failed to pull {} ({}): {e}", item.remote_id, item.title);
                        result.errors += 1;
                    }
                }
            }
        }
        pb.finish_and_clear();

        log::info!(
            "Pull: {} listed, {} known, {} inserted, {} linked, {} aliased, {} skipped, {} errors",
            result.listed,
            result.known,
            result.inserted,
            result.linked,
            result.aliased,
            result.skipped,
            result.errors
        );
        Ok(result)
    }

    /// Decide what a finished download becomes. Runs only on the calling
    /// thread, so the duplicate check and the write after it are atomic with
    /// respect to every other item.
    fn settle(&self, root: &Path, item: &RemoteEntry, download: Download) -> Result<Pulled, SyncError> {
        // The scratch directory lives until the outcome is decided
        let Download {
            scratch: _scratch,
            audio,
        } = download;

        if let Some(dup) =
            self.settings
                .duplicates
                .find_duplicate(self.db, audio.duration, &audio.fingerprint)?
        {
            let id = dup.entry.id;
            return match dup.entry.remote_id {
                None => {
                    let link = EntryUpdate {
                        remote_id: Some(item.remote_id.clone()),
                        ..Default::default()
                    };
                    self.db.update(id, &link)?;
                    Ok(Pulled::Linked {
                        id,
                        distance: dup.distance,
                    })
                }
                Some(linked_to) => {
                    self.db.add_remote_alias(&item.remote_id, id)?;
                    Ok(Pulled::Aliased { id, linked_to })
                }
            };
        }

        let target = self.library_target(root, item, &audio)?;
        let filepath = relative_path(root, &target).ok_or_else(|| {
            SyncError::Configuration(format!("{} is outside the library", target.display()))
        })?;
        let new = audio.to_new_entry(filepath.clone(), Some(item.remote_id.clone()));

        // Row and file land together or not at all
        let tx = self.db.conn.unchecked_transaction().map_err(DbError::from)?;
        let entry = Database::insert_row(&tx, &new)?;
        move_file(&audio.path, &target)?;
        if let Err(e) = tx.commit() {
            if let Err(cleanup) = std::fs::remove_file(&target) {
                log::warn!("Could not remove {} after failed commit: {cleanup}", target.display());
            }
            return Err(DbError::from(e).into());
        }

        Ok(Pulled::Inserted {
            id: entry.id,
            filepath,
        })
    }

    /// Free library path for a new download, named after its title.
    ///
    /// A name counts as taken if a file exists there or a catalog entry
    /// already claims it.
    fn library_target(
        &self,
        root: &Path,
        item: &RemoteEntry,
        audio: &ProbedAudio,
    ) -> Result<std::path::PathBuf, SyncError> {
        let stem = sanitize_filename(&item.title, &item.remote_id);
        let base = match audio.path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{stem}.{}", ext.to_lowercase()),
            None => stem,
        };

        let lookup_error: Cell<Option<DbError>> = Cell::new(None);
        let target = resolve_collision_with(root, &base, |candidate| {
            if candidate.exists() {
                return true;
            }
            let Some(rel) = relative_path(root, candidate) else {
                return false;
            };
            match self.db.filepath_taken(&rel) {
                Ok(taken) => taken,
                Err(e) => {
                    lookup_error.set(Some(e));
                    false
                }
            }
        });
        match lookup_error.take() {
            Some(e) => Err(e.into()),
            None => Ok(target),
        }
    }
}

/// Fetch and probe one item inside its own scratch directory. On failure the
/// directory is removed before returning.
fn download<P, R>(
    remote: &R,
    probe: &P,
    item: &RemoteEntry,
    temp_root: Option<&Path>,
) -> Result<Download, SyncError>
where
    P: MediaProbe + ?Sized,
    R: RemoteSource + ?Sized,
{
    let mut builder = tempfile::Builder::new();
    builder.prefix("mpsync-");
    let scratch = match temp_root {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };

    let file = remote.fetch(item, scratch.path())?;
    let audio = ProbedAudio::probe(probe, &file)?;
    Ok(Download { scratch, audio })
}
