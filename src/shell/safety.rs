use crate::error::AppError;
use std::path::{Component, Path};

const PROTECTED_ROOTS: &[&str] = &[
    "/",
    "/Applications",
    "/bin",
    "/boot",
    "/dev",
    "/etc",
    "/Library",
    "/proc",
    "/sbin",
    "/sys",
    "/System",
    "/usr",
    "C:\\Windows",
    "C:\\Program Files",
    "C:\\Program Files (x86)",
];

pub fn validate_path(path: &str) -> Result<(), AppError> {
    if path.trim().is_empty() {
        return Err(AppError::General("path is empty".to_string()));
    }

    if path.contains('\0') {
        return Err(AppError::General("path contains a NUL byte".to_string()));
    }

    let p = Path::new(path);
    for component in p.components() {
        if let Component::ParentDir = component {
            return Err(AppError::General(
                "path traversal (.. component) not allowed".to_string(),
            ));
        }
    }

    Ok(())
}

pub fn is_protected_path(path: &str) -> bool {
    let normalized = normalize_path_for_match(path);
    PROTECTED_ROOTS.iter().any(|root| {
        let root_normalized = normalize_path_for_match(root);
        if root_normalized == "/" {
            return normalized == "/";
        }
        if is_windows_style_path(&root_normalized) {
            let normalized_lower = normalized.to_ascii_lowercase();
            let root_lower = root_normalized.to_ascii_lowercase();
            normalized_lower == root_lower
                || normalized_lower.starts_with(&format!("{root_lower}/"))
        } else {
            normalized == root_normalized || normalized.starts_with(&format!("{root_normalized}/"))
        }
    })
}

fn normalize_path_for_match(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

fn is_windows_style_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

pub fn validate_not_protected(path: &str) -> Result<(), AppError> {
    if is_protected_path(path) {
        return Err(AppError::General(format!(
            "operation on protected path not allowed: {path}"
        )));
    }
    Ok(())
}

/// The working tree gets cleared on every run, so it must be a dedicated
/// directory: not protected, and neither inside nor containing the source.
pub fn validate_working_root(working_root: &Path, source_root: &Path) -> Result<(), AppError> {
    let working = working_root.to_string_lossy();
    let source = source_root.to_string_lossy();
    validate_path(&working)?;
    validate_not_protected(&working)?;

    let working_norm = normalize_path_for_match(&working);
    let source_norm = normalize_path_for_match(&source);
    let nested = |inner: &str, outer: &str| {
        inner == outer || inner.starts_with(&format!("{}/", outer.trim_end_matches('/')))
    };
    if nested(&working_norm, &source_norm) || nested(&source_norm, &working_norm) {
        return Err(AppError::General(format!(
            "working root {working} overlaps source root {source}"
        )));
    }
    Ok(())
}
