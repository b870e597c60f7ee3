use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Longest file stem we produce, in characters.
const MAX_STEM_CHARS: usize = 120;

// Characters that are invalid or awkward in filenames on common filesystems
static UNSAFE_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Turn a free-form title into a safe file stem. Falls back to `fallback`
/// when nothing usable remains.
pub fn sanitize_filename(title: &str, fallback: &str) -> String {
    let replaced = UNSAFE_CHARS_RE.replace_all(title, "_");
    let collapsed = WHITESPACE_RE.replace_all(&replaced, " ");
    let trimmed = collapsed.trim_matches(|c: char| c == '.' || c.is_whitespace());

    let stem: String = trimmed.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim_end().to_string();
    if stem.is_empty() || stem.chars().all(|c| c == '_') {
        fallback.to_string()
    } else {
        stem
    }
}

/// First free path for `base_name` in `target_dir`: the name itself, then
/// `stem (1).ext`, `stem (2).ext`, and so on.
pub fn resolve_collision(target_dir: &Path, base_name: &str) -> PathBuf {
    resolve_collision_with(target_dir, base_name, |p| p.exists())
}

/// [`resolve_collision`] with a caller-supplied notion of "taken".
pub fn resolve_collision_with<F>(target_dir: &Path, base_name: &str, taken: F) -> PathBuf
where
    F: Fn(&Path) -> bool,
{
    let first = target_dir.join(base_name);
    if !taken(&first) {
        return first;
    }

    let base = Path::new(base_name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base_name.to_string());
    let ext = base.extension().map(|e| e.to_string_lossy().into_owned());

    (1u32..)
        .map(|n| {
            let name = match &ext {
                Some(ext) => format!("{stem} ({n}).{ext}"),
                None => format!("{stem} ({n})"),
            };
            target_dir.join(name)
        })
        .find(|candidate| !taken(candidate))
        .unwrap_or(first)
}

/// Move a file, copying across filesystems when a rename is not possible.
pub fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                e
            );
            std::fs::copy(src, dst)?;
            std::fs::remove_file(src)
        }
    }
}
