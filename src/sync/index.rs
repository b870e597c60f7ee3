use super::{progress_bar, Reconciler, SyncError};
use crate::db::DbError;
use crate::probe::{MediaProbe, ProbeError, ProbedAudio};
use crate::remote::RemoteSource;
use crate::scanner::{collect_audio_files, relative_path};
use rayon::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexResult {
    /// Audio files found under the library root.
    pub scanned: u64,
    /// Files already catalogued by path.
    pub known: u64,
    pub inserted: u64,
    /// New files that are near-duplicates of an existing entry.
    pub duplicates: u64,
    /// New files rejected by a uniqueness constraint (e.g. a byte-identical copy).
    pub skipped: u64,
    pub errors: u64,
}

enum Indexed {
    Inserted(i64),
    Duplicate { of: i64, distance: usize },
}

impl<P: MediaProbe + ?Sized, R: RemoteSource + ?Sized> Reconciler<'_, P, R> {
    /// Catalogue every audio file under the library root that has no entry yet.
    pub fn index(&self) -> Result<IndexResult, SyncError> {
        let root = self.existing_library_root()?;
        let files = collect_audio_files(root);
        let mut result = IndexResult {
            scanned: files.len() as u64,
            ..Default::default()
        };

        let mut pending: Vec<(String, PathBuf)> = Vec::new();
        for path in files {
            let Some(rel) = relative_path(root, &path) else {
                log::warn!("Not indexing {}: filename is not valid UTF-8", path.display());
                result.errors += 1;
                continue;
            };
            if self.db.filepath_taken(&rel)? {
                result.known += 1;
            } else {
                pending.push((rel, path));
            }
        }

        if pending.is_empty() {
            log::info!("No new files to index ({} already known)", result.known);
            return Ok(result);
        }

        let workers = self.settings.workers.max(1);
        log::info!("Indexing {} new files with {} workers", pending.len(), workers);

        let pool = Self::worker_pool(workers)?;
        let probe = self.probe;
        let pb = progress_bar(pending.len(), "files");

        // Probe a chunk in parallel, then write it serially, then move on.
        for chunk in pending.chunks(workers * 2) {
            let probed: Vec<Result<ProbedAudio, ProbeError>> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|(_, path)| {
                        let audio = ProbedAudio::probe(probe, path);
                        pb.inc(1);
                        audio
                    })
                    .collect()
            });

            for ((rel, _), audio) in chunk.iter().zip(probed) {
                let outcome = audio
                    .map_err(SyncError::from)
                    .and_then(|audio| self.index_one(rel, &audio));
                match outcome {
                    Ok(Indexed::Inserted(id)) => {
                        log::debug!("Indexed {rel} as entry {id}");
                        result.inserted += 1;
                    }
                    Ok(Indexed::Duplicate { of, distance }) => {
                        log::info!("Not indexing {rel}: near-duplicate of entry {of} (distance {distance})");
                        result.duplicates += 1;
                    }
                    Err(SyncError::Db(DbError::ConstraintViolation { field, value })) => {
                        log::info!("Not indexing {rel}: {field} {value} already catalogued");
                        result.skipped += 1;
                    }
                    Err(e) if e.is_fatal() => {
                        pb.abandon();
                        return Err(e);
                    }
                    Err(e) => {
                        log::warn!("Failed to index {rel}: {e}");
                        result.errors += 1;
                    }
                }
            }
            pb.set_message(format!("{} indexed, {} failed", result.inserted, result.errors));
        }
        pb.finish_and_clear();

        log::info!(
            "Index: {} scanned, {} known, {} inserted, {} duplicates, {} skipped, {} errors",
            result.scanned,
            result.known,
            result.inserted,
            result.duplicates,
            result.skipped,
            result.errors
        );
        Ok(result)
    }

    fn index_one(&self, rel: &str, audio: &ProbedAudio) -> Result<Indexed, SyncError> {
        let new = audio.to_new_entry(rel.to_string(), None);
        // Exact collisions first, so a byte-identical copy reports its content hash
        self.db.check_unique(&new)?;

        if let Some(dup) =
            self.settings
                .duplicates
                .find_duplicate(self.db, new.duration, &new.fingerprint)?
        {
            return Ok(Indexed::Duplicate {
                of: dup.entry.id,
                distance: dup.distance,
            });
        }

        let entry = self.db.insert(&new)?;
        Ok(Indexed::Inserted(entry.id))
    }
}
