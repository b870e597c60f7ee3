use super::{progress_bar, Reconciler, SyncError};
use crate::db::models::{duration_centis, round_duration, Entry, EntryFilter, EntryUpdate};
use crate::probe::{MediaProbe, ProbeError};
use crate::remote::RemoteSource;
use crate::scanner::absolute_path;
use rayon::prelude::*;
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub checked: u64,
    pub deleted: u64,
    pub refreshed: u64,
    pub errors: u64,
}

/// Freshly read mutable properties of a file that still exists.
struct Refreshed {
    duration: f64,
    rating: Option<f64>,
}

impl<P: MediaProbe + ?Sized, R: RemoteSource + ?Sized> Reconciler<'_, P, R> {
    /// Drop entries whose file is gone. With `refresh`, re-read duration and
    /// rating of the files that remain and store whatever changed.
    pub fn verify(&self, refresh: bool) -> Result<VerifyResult, SyncError> {
        let root = self.existing_library_root()?;
        let entries = self.db.list(&EntryFilter::default())?;
        let mut result = VerifyResult {
            checked: entries.len() as u64,
            ..Default::default()
        };
        log::info!("Verifying {} entries under {}", entries.len(), root.display());

        let mut present = Vec::new();
        for entry in entries {
            if absolute_path(root, &entry.filepath).is_file() {
                present.push(entry);
                continue;
            }
            // delete is idempotent, so a row removed concurrently is not an error
            if self.db.delete(entry.id)? {
                log::info!("Removed entry {} ({}): file is gone", entry.id, entry.filepath);
                result.deleted += 1;
            }
        }

        if refresh && !present.is_empty() {
            self.refresh_entries(root, &present, &mut result)?;
        }

        log::info!(
            "Verify: {} checked, {} deleted, {} refreshed, {} errors",
            result.checked,
            result.deleted,
            result.refreshed,
            result.errors
        );
        Ok(result)
    }

    fn refresh_entries(
        &self,
        root: &Path,
        entries: &[Entry],
        result: &mut VerifyResult,
    ) -> Result<(), SyncError> {
        let workers = self.settings.workers.max(1);
        let pool = Self::worker_pool(workers)?;
        let probe = self.probe;
        let pb = progress_bar(entries.len(), "files");

        for chunk in entries.chunks(workers * 2) {
            let probed: Vec<Result<Refreshed, ProbeError>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|entry| {
                        let path = absolute_path(root, &entry.filepath);
                        let refreshed = read_mutable(probe, &path);
                        pb.inc(1);
                        refreshed
                    })
                    .collect()
            });

            for (entry, probed) in chunk.iter().zip(probed) {
                let fresh = match probed {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        log::warn!("Could not re-read {}: {}", entry.filepath, e);
                        result.errors += 1;
                        continue;
                    }
                };
                let update = changes(entry, &fresh);
                if update.is_empty() {
                    continue;
                }
                // NotFound here means the row vanished mid-pass: fatal
                self.db.update(entry.id, &update)?;
                log::debug!("Refreshed entry {} ({})", entry.id, entry.filepath);
                result.refreshed += 1;
            }
            pb.set_message(format!("{} refreshed, {} failed", result.refreshed, result.errors));
        }
        pb.finish_and_clear();
        Ok(())
    }
}

fn read_mutable<P: MediaProbe + ?Sized>(probe: &P, path: &Path) -> Result<Refreshed, ProbeError> {
    Ok(Refreshed {
        duration: round_duration(probe.duration(path)?),
        rating: probe.rating(path)?,
    })
}

fn changes(entry: &Entry, fresh: &Refreshed) -> EntryUpdate {
    EntryUpdate {
        duration: (duration_centis(entry.duration) != duration_centis(fresh.duration))
            .then_some(fresh.duration),
        rating: (entry.rating != fresh.rating).then_some(fresh.rating),
        remote_id: None,
    }
}
