use crate::db::models::{duration_centis, Entry, EntryFilter};
use crate::db::Database;
use crate::fingerprint;
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

/// Two recordings of the same track differ in duration by at most this much.
pub const DURATION_TOLERANCE_SECONDS: f64 = 5.0;

/// Pull/index-time linking threshold. Tight, since a false positive silently
/// drops a download.
pub const FINGERPRINT_DISTANCE_THRESHOLD: usize = 100;

/// Batch report threshold. Coarse, since the report is reviewed by a human.
pub const REPORT_DISTANCE_THRESHOLD: usize = 400;

/// An existing entry judged to be the same recording as a candidate.
#[derive(Debug, Clone)]
pub struct NearDuplicate {
    pub entry: Entry,
    pub distance: usize,
}

/// One near-duplicate pair from the full-library report (`left.id < right.id`).
#[derive(Debug, Clone, Serialize)]
pub struct DuplicatePair {
    pub left: Entry,
    pub right: Entry,
    pub distance: usize,
    pub duration_gap: f64,
}

/// The full-library report as printed by `dedup --json`.
#[derive(Debug, Serialize)]
pub struct DuplicateReport {
    pub generated_at: DateTime<Utc>,
    /// Entries compared.
    pub entries: usize,
    pub threshold: usize,
    pub tolerance_secs: f64,
    pub pairs: Vec<DuplicatePair>,
}

/// Finds near-duplicate entries by duration-bucketed pruning plus fingerprint
/// edit distance.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateIndex {
    tolerance_centis: i64,
    threshold: usize,
}

impl Default for DuplicateIndex {
    fn default() -> Self {
        Self::new(DURATION_TOLERANCE_SECONDS, FINGERPRINT_DISTANCE_THRESHOLD)
    }
}

impl DuplicateIndex {
    pub fn new(tolerance_secs: f64, threshold: usize) -> Self {
        Self {
            tolerance_centis: duration_centis(tolerance_secs.max(0.0)),
            threshold,
        }
    }

    pub fn tolerance_secs(&self) -> f64 {
        self.tolerance_centis as f64 / 100.0
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Inclusive on both sides: a gap equal to the tolerance is inside.
    pub fn within_window(&self, a: f64, b: f64) -> bool {
        (duration_centis(a) - duration_centis(b)).abs() <= self.tolerance_centis
    }

    /// Best near-duplicate of (`duration`, `fp`) among `entries`.
    ///
    /// `entries` must be ordered by ascending duration; on equal distance the
    /// first one encountered wins.
    pub fn best_match<'e>(
        &self,
        duration: f64,
        fp: &str,
        entries: &'e [Entry],
    ) -> Option<(&'e Entry, usize)> {
        let mut best: Option<(&Entry, usize)> = None;
        for entry in entries {
            if !self.within_window(duration, entry.duration) {
                continue;
            }
            let dist = fingerprint::distance(fp, &entry.fingerprint);
            if dist >= self.threshold {
                continue;
            }
            if best.is_none_or(|(_, d)| dist < d) {
                best = Some((entry, dist));
            }
        }
        best
    }

    /// Query the catalog's duration window around `duration` and return the
    /// closest near-duplicate, if any.
    pub fn find_duplicate(
        &self,
        db: &Database,
        duration: f64,
        fp: &str,
    ) -> crate::db::Result<Option<NearDuplicate>> {
        // Widen by half a hundredth so stored rounding never excludes a boundary row;
        // within_window applies the exact cut.
        let slack = self.tolerance_secs() + 0.005;
        let window = db.list_duration_window(duration - slack, duration + slack)?;
        log::debug!(
            "Duplicate check: {} candidates within {:.2}s of {:.2}s",
            window.len(),
            self.tolerance_secs(),
            duration
        );

        Ok(self
            .best_match(duration, fp, &window)
            .map(|(entry, distance)| NearDuplicate {
                entry: entry.clone(),
                distance,
            }))
    }

    /// Report over every entry in the catalog.
    pub fn catalog_report(&self, db: &Database, jobs: usize) -> crate::db::Result<DuplicateReport> {
        let entries = db.list(&EntryFilter::default())?;
        let count = entries.len();
        log::info!(
            "Comparing {} entries (threshold {}, tolerance {:.2}s)",
            count,
            self.threshold,
            self.tolerance_secs()
        );
        Ok(DuplicateReport {
            generated_at: Utc::now(),
            entries: count,
            threshold: self.threshold,
            tolerance_secs: self.tolerance_secs(),
            pairs: self.report(entries, jobs),
        })
    }

    /// Every unordered near-duplicate pair in `entries`, each considered once.
    ///
    /// Entries are sorted by duration and each one is compared only against the
    /// entries after it whose duration still lies inside the window.
    pub fn report(&self, mut entries: Vec<Entry>, jobs: usize) -> Vec<DuplicatePair> {
        entries.sort_by(|a, b| {
            duration_centis(a.duration)
                .cmp(&duration_centis(b.duration))
                .then(a.id.cmp(&b.id))
        });
        let n = entries.len();
        if n < 2 {
            return Vec::new();
        }

        let pb = ProgressBar::new(n as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} entries ({eta} remaining)",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
        );

        let scan = |i: usize| -> Vec<DuplicatePair> {
            let a = &entries[i];
            let mut pairs = Vec::new();
            for b in &entries[i + 1..] {
                if !self.within_window(a.duration, b.duration) {
                    // Sorted: every later entry is further away
                    break;
                }
                let distance = fingerprint::distance(&a.fingerprint, &b.fingerprint);
                if distance < self.threshold {
                    let (left, right) = if a.id < b.id { (a, b) } else { (b, a) };
                    pairs.push(DuplicatePair {
                        left: left.clone(),
                        right: right.clone(),
                        distance,
                        duration_gap: (duration_centis(b.duration) - duration_centis(a.duration))
                            as f64
                            / 100.0,
                    });
                }
            }
            pb.inc(1);
            pairs
        };

        let mut pairs: Vec<DuplicatePair> = match rayon::ThreadPoolBuilder::new()
            .num_threads(jobs.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| (0..n).into_par_iter().flat_map_iter(scan).collect()),
            Err(e) => {
                log::warn!("Could not build worker pool ({e}), comparing serially");
                (0..n).flat_map(scan).collect()
            }
        };
        pb.finish_and_clear();

        pairs.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then(a.left.id.cmp(&b.left.id))
                .then(a.right.id.cmp(&b.right.id))
        });
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewEntry;

    fn entry(id: i64, duration: f64, fp: &str) -> Entry {
        Entry {
            id,
            fingerprint: fp.to_string(),
            content_hash: format!("hash-{id}"),
            remote_id: None,
            filepath: format!("{id}.mp3"),
            duration,
            rating: None,
        }
    }

    #[test]
    fn test_empty_catalog_has_no_match() {
        let index = DuplicateIndex::new(5.0, 3);
        assert!(index.best_match(180.0, "abcd", &[]).is_none());

        let db = Database::open_in_memory().unwrap();
        assert!(index.find_duplicate(&db, 180.0, "abcd").unwrap().is_none());
    }

    #[test]
    fn test_duration_boundary_is_inclusive() {
        let index = DuplicateIndex::new(5.0, 3);
        let exact = [entry(1, 185.0, "abcd")];
        assert!(index.best_match(180.0, "abcd", &exact).is_some());

        let below = [entry(1, 175.0, "abcd")];
        assert!(index.best_match(180.0, "abcd", &below).is_some());

        let beyond = [entry(1, 185.01, "abcd")];
        assert!(index.best_match(180.0, "abcd", &beyond).is_none());
    }

    #[test]
    fn test_distance_threshold_is_strict() {
        // distance("abcd", "abxy") == 2
        let entries = [entry(1, 180.0, "abxy")];
        assert!(DuplicateIndex::new(5.0, 2).best_match(180.0, "abcd", &entries).is_none());
        let (hit, dist) = DuplicateIndex::new(5.0, 3)
            .best_match(180.0, "abcd", &entries)
            .unwrap();
        assert_eq!(hit.id, 1);
        assert_eq!(dist, 2);
    }

    #[test]
    fn test_smallest_distance_wins() {
        let index = DuplicateIndex::new(5.0, 4);
        let entries = [
            entry(1, 178.0, "abxy"),
            entry(2, 181.0, "abcx"),
            entry(3, 183.0, "wxyz"),
        ];
        let (hit, dist) = index.best_match(180.0, "abcd", &entries).unwrap();
        assert_eq!(hit.id, 2);
        assert_eq!(dist, 1);
    }

    #[test]
    fn test_tie_keeps_first_in_duration_order() {
        let index = DuplicateIndex::new(5.0, 4);
        let entries = [entry(7, 179.0, "abcx"), entry(3, 182.0, "abcy")];
        let (hit, _) = index.best_match(180.0, "abcd", &entries).unwrap();
        assert_eq!(hit.id, 7);
    }

    #[test]
    fn test_find_duplicate_uses_catalog_window() {
        let db = Database::open_in_memory().unwrap();
        for (tag, duration, fp) in [("a", 180.0, "abcd"), ("b", 300.0, "abcd-long")] {
            db.insert(&NewEntry {
                fingerprint: fp.into(),
                content_hash: format!("hash-{tag}"),
                remote_id: None,
                filepath: format!("{tag}.mp3"),
                duration,
                rating: None,
            })
            .unwrap();
        }

        let index = DuplicateIndex::new(5.0, 3);
        let dup = index.find_duplicate(&db, 180.1, "abce").unwrap().unwrap();
        assert_eq!(dup.entry.filepath, "a.mp3");
        assert_eq!(dup.distance, 1);

        // Same fingerprint, but nothing within the window
        assert!(index.find_duplicate(&db, 240.0, "abcd").unwrap().is_none());
    }

    #[test]
    fn test_report_emits_each_pair_once() {
        let index = DuplicateIndex::new(5.0, 3);
        let entries = vec![
            entry(1, 180.0, "abcdef"),
            entry(2, 184.0, "abcdxf"), // 1 from #1
            entry(3, 185.0, "abcxyf"), // 2 from #1, 2 from #2
            entry(4, 200.0, "abcdef"), // identical to #1 but 20s away
            entry(5, 186.0, "zzzzzz"), // in window, too far by fingerprint
        ];

        let pairs = index.report(entries, 2);
        let ids: Vec<(i64, i64, usize)> = pairs
            .iter()
            .map(|p| (p.left.id, p.right.id, p.distance))
            .collect();
        assert_eq!(ids, vec![(1, 2, 1), (1, 3, 2), (2, 3, 2)]);

        for p in &pairs {
            assert!(p.left.id < p.right.id);
            assert!(p.duration_gap <= 5.0);
        }
    }

    #[test]
    fn test_report_boundary_pairs() {
        let index = DuplicateIndex::new(5.0, 2);
        let entries = vec![
            entry(1, 100.0, "abcd"),
            entry(2, 105.0, "abce"),  // gap == tolerance, distance 1: reported
            entry(3, 110.01, "abcd"), // gap from #2 just over tolerance
            entry(4, 110.01, "abxy"), // distance 2 from #3 == threshold
        ];
        let pairs = index.report(entries, 1);
        let ids: Vec<(i64, i64)> = pairs.iter().map(|p| (p.left.id, p.right.id)).collect();
        assert_eq!(ids, vec![(1, 2)]);
    }

    #[test]
    fn test_catalog_report() {
        let db = Database::open_in_memory().unwrap();
        for (i, (duration, fp)) in [(200.0, "AQADtNIy"), (201.0, "AQADtNIz"), (300.0, "AQADtNIy0")]
            .into_iter()
            .enumerate()
        {
            db.insert(&NewEntry {
                fingerprint: fp.into(),
                content_hash: format!("h{i}"),
                remote_id: None,
                filepath: format!("{i}.mp3"),
                duration,
                rating: None,
            })
            .unwrap();
        }

        let report = DuplicateIndex::default().catalog_report(&db, 2).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.pairs[0].distance, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["generated_at"].is_string());
        assert_eq!(json["pairs"][0]["left"]["filepath"], "0.mp3");
    }

    #[test]
    fn test_report_small_inputs() {
        let index = DuplicateIndex::default();
        assert!(index.report(Vec::new(), 1).is_empty());
        assert!(index.report(vec![entry(1, 1.0, "a")], 1).is_empty());
    }
}
