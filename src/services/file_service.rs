use crate::error::AppError;
use crate::shell::safety::{validate_not_protected, validate_path};
use std::fs::{self, FileTimes};
use std::path::Path;
use walkdir::WalkDir;

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_invalid_char(c: char) -> bool {
    c.is_control() || INVALID_FILENAME_CHARS.contains(&c)
}

pub fn is_valid_filename(name: &str) -> bool {
    !name.trim().is_empty() && name != "." && name != ".." && !name.chars().any(is_invalid_char)
}

/// Makes `name` usable on every platform: invalid characters become `_`,
/// surrounding whitespace and trailing dots go, reserved device names get
/// a `_` prefix. Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if is_invalid_char(c) { '_' } else { c })
        .collect();
    let mut sanitized = replaced
        .trim_start()
        .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();

    let stem = match sanitized.rfind('.') {
        Some(idx) if idx > 0 => &sanitized[..idx],
        _ => sanitized.as_str(),
    };
    if RESERVED_NAMES.contains(&stem.to_ascii_uppercase().as_str()) {
        sanitized.insert(0, '_');
    }

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// Copies `source` to `target`, creating parent directories and carrying
/// over the access and modification times.
pub fn copy_preserving_times(source: &Path, target: &Path) -> Result<u64, AppError> {
    let metadata = fs::metadata(source).map_err(|err| {
        AppError::General(format!("source not readable: {}: {err}", source.display()))
    })?;
    if !metadata.is_file() {
        return Err(AppError::General(format!(
            "source is not a file: {}",
            source.display()
        )));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let bytes = fs::copy(source, target)?;

    let mut times = FileTimes::new();
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    let file = fs::File::options().write(true).open(target)?;
    if let Err(err) = file.set_times(times) {
        tracing::debug!(target = %target.display(), error = %err, "could not preserve timestamps");
    }
    Ok(bytes)
}

/// Empties `root`, creating it when absent. Symlinks are removed, never
/// followed. Returns the number of top-level entries removed.
pub fn clear_dir(root: &Path) -> Result<usize, AppError> {
    let root_text = root.to_string_lossy();
    validate_path(&root_text)?;
    validate_not_protected(&root_text)?;

    if !root.exists() {
        fs::create_dir_all(root)?;
        return Ok(0);
    }

    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| AppError::General(err.to_string()))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
        removed += 1;
    }
    Ok(removed)
}

pub fn create_dir(path: &Path) -> Result<(), AppError> {
    let text = path.to_string_lossy();
    validate_path(&text)?;
    validate_not_protected(&text)?;
    fs::create_dir_all(path)?;
    Ok(())
}
