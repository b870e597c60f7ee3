use serde::Serialize;

/// A catalog row: one known audio recording.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub id: i64,
    pub fingerprint: String,
    pub content_hash: String,
    pub remote_id: Option<String>,
    /// Relative to the library root.
    pub filepath: String,
    /// Seconds, rounded to two decimal places.
    pub duration: f64,
    /// Normalized to [0, 1].
    pub rating: Option<f64>,
}

/// Data for inserting a new entry (index and pull passes).
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub fingerprint: String,
    pub content_hash: String,
    pub remote_id: Option<String>,
    pub filepath: String,
    pub duration: f64,
    pub rating: Option<f64>,
}

/// Partial update of the mutable entry fields. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct EntryUpdate {
    pub rating: Option<Option<f64>>,
    pub duration: Option<f64>,
    pub remote_id: Option<String>,
}

impl EntryUpdate {
    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.duration.is_none() && self.remote_id.is_none()
    }
}

/// Exact-match predicate over one or more entry fields. Empty filter matches all rows.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub id: Option<i64>,
    pub fingerprint: Option<String>,
    pub content_hash: Option<String>,
    pub remote_id: Option<String>,
    pub filepath: Option<String>,
    pub duration: Option<f64>,
}

/// Unique columns that can collide on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Filepath,
    ContentHash,
    Fingerprint,
    RemoteId,
}

impl UniqueField {
    /// Order in which collisions are reported when several fields clash at once.
    pub const CHECK_ORDER: [UniqueField; 4] = [
        UniqueField::Filepath,
        UniqueField::ContentHash,
        UniqueField::Fingerprint,
        UniqueField::RemoteId,
    ];

    pub fn column(self) -> &'static str {
        match self {
            Self::Filepath => "filepath",
            Self::ContentHash => "content_hash",
            Self::Fingerprint => "fingerprint",
            Self::RemoteId => "remote_id",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        match column {
            "filepath" => Some(Self::Filepath),
            "content_hash" => Some(Self::ContentHash),
            "fingerprint" => Some(Self::Fingerprint),
            "remote_id" => Some(Self::RemoteId),
            _ => None,
        }
    }

    /// The value `entry` carries for this field, if any.
    pub fn value_of(self, entry: &NewEntry) -> Option<&str> {
        match self {
            Self::Filepath => Some(&entry.filepath),
            Self::ContentHash => Some(&entry.content_hash),
            Self::Fingerprint => Some(&entry.fingerprint),
            Self::RemoteId => entry.remote_id.as_deref(),
        }
    }
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column())
    }
}

/// Catalog statistics.
pub struct CatalogStats {
    pub total_entries: i64,
    pub linked_entries: i64,
    pub rated_entries: i64,
    pub remote_aliases: i64,
    pub total_duration_hours: f64,
}

impl CatalogStats {
    pub fn unlinked_entries(&self) -> i64 {
        self.total_entries - self.linked_entries
    }
}

/// Round seconds to the two decimal places the catalog stores.
pub fn round_duration(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

/// Duration as whole hundredths of a second, for exact window comparisons.
pub fn duration_centis(secs: f64) -> i64 {
    (secs * 100.0).round() as i64
}
