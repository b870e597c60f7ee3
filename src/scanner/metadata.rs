use lofty::file::TaggedFileExt;
use lofty::prelude::*;
use std::path::Path;

/// Tag items that carry a user rating, checked in order.
const RATING_KEYS: &[&str] = &["FMPS_RATING", "RATING", "POPULARIMETER", "rating"];

/// Properties read from the audio container and its tags.
pub struct TagInfo {
    pub duration_secs: Option<f64>,
    pub rating: Option<f64>,
}

/// Read duration and rating from an audio file.
pub fn read_tags(path: &Path) -> Result<TagInfo, lofty::error::LoftyError> {
    let tagged_file = lofty::read_from_path(path)?;

    let duration_secs = {
        let secs = tagged_file.properties().duration().as_secs_f64();
        if secs > 0.0 { Some(secs) } else { None }
    };

    // Try primary tag first, then any other tag the container carries
    let rating = tagged_file
        .primary_tag()
        .into_iter()
        .chain(tagged_file.tags().iter())
        .find_map(|tag| {
            RATING_KEYS.iter().find_map(|key| {
                tag.get_string(&ItemKey::Unknown((*key).to_string()))
                    .and_then(parse_rating)
            })
        });

    Ok(TagInfo { duration_secs, rating })
}

/// Normalize a stored rating to [0, 1].
///
/// Players write ratings on several scales: 0-1 (FMPS), 0-5 stars, 0-100
/// percent, and 0-255 (ID3 popularimeter). Anything else is discarded.
pub fn parse_rating(raw: &str) -> Option<f64> {
    // Popularimeter strings look like "email|rating|counter"
    let value = raw
        .split('|')
        .map(str::trim)
        .find_map(|part| part.parse::<f64>().ok())?;

    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let normalized = if value <= 1.0 {
        value
    } else if value <= 5.0 {
        value / 5.0
    } else if value <= 100.0 {
        value / 100.0
    } else if value <= 255.0 {
        value / 255.0
    } else {
        return None;
    };
    Some(normalized)
}
