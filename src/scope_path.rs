//! Helpers for the `/`-rooted relative paths stored on records and plans.

use std::path::{Component, Path, PathBuf};

pub fn normalize(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    while normalized.ends_with('/') && normalized.len() > 1 {
        normalized.pop();
    }
    normalized
}

pub fn is_within_scope(path: &str, root: &str) -> bool {
    let path = normalize(path);
    let root = normalize(root);

    if path == root {
        return true;
    }

    if root == "/" {
        return path.starts_with('/');
    }

    if cfg!(windows) {
        let path_lower = path.to_ascii_lowercase();
        let root_lower = root.to_ascii_lowercase();
        return path_lower.starts_with(&(root_lower + "/"));
    }

    path.starts_with(&(root + "/"))
}

pub fn join(dir: &str, name: &str) -> String {
    let dir = normalize(dir);
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Number of components: `/` is 0, `/Finance/2024` is 2.
pub fn depth(path: &str) -> usize {
    normalize(path).split('/').filter(|s| !s.is_empty()).count()
}

pub fn parent(path: &str) -> Option<String> {
    let normalized = normalize(path);
    if normalized == "/" {
        return None;
    }
    match normalized.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(normalized[..idx].to_string()),
        None => None,
    }
}

pub fn folder_name(path: &str) -> String {
    let normalized = normalize(path);
    match normalized.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "root".to_string(),
    }
}

/// Every ancestor of `path` plus `path` itself, excluding `/`.
pub fn with_ancestors(path: &str) -> Vec<String> {
    let normalized = normalize(path);
    let mut out = Vec::new();
    let mut current = String::new();
    for segment in normalized.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        out.push(current.clone());
    }
    out
}

pub fn has_traversal(path: &str) -> bool {
    path.replace('\\', "/").split('/').any(|segment| segment == "..")
}

/// Maps a `/`-rooted relative path under `root`. Returns `None` for paths
/// that would climb out of it.
pub fn resolve_under(root: &Path, relative: &str) -> Option<PathBuf> {
    if has_traversal(relative) {
        return None;
    }
    let mut out = root.to_path_buf();
    for component in Path::new(normalize(relative).trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

/// Clamps `path` to `max_depth` components, folding the overflow into the
/// last kept component (`/a/b/c/d/e` at depth 3 becomes `/a/b/c_d_e`).
pub fn clamp_depth(path: &str, max_depth: usize) -> String {
    let normalized = normalize(path);
    let mut segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    if max_depth == 0 || segments.len() <= max_depth {
        return normalized;
    }
    let overflow = segments.split_off(max_depth).join("_");
    let mut kept: Vec<String> = segments.iter().map(|s| s.to_string()).collect();
    if let Some(last) = kept.last_mut() {
        *last = format!("{last}_{overflow}");
    }
    format!("/{}", kept.join("/"))
}
