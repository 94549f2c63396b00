use std::fs;
use std::path::{Path, PathBuf};

use crate::config::ShortcutKind;
use crate::error::AppError;

/// Mechanism a shortcut ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatedShortcut {
    Symlink,
    Url,
    Desktop,
}

impl std::fmt::Display for CreatedShortcut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symlink => write!(f, "symlink"),
            Self::Url => write!(f, "url"),
            Self::Desktop => write!(f, "desktop"),
        }
    }
}

fn file_url(target: &Path) -> String {
    let absolute = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    let text = absolute.to_string_lossy().replace('\\', "/");
    if text.starts_with('/') {
        format!("file://{text}")
    } else {
        format!("file:///{text}")
    }
}

fn with_suffix(link: &Path, suffix: &str) -> PathBuf {
    if link.extension().is_some_and(|ext| ext == suffix) {
        return link.to_path_buf();
    }
    let mut name = link.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn create_symlink(target: &Path, link: &Path) -> Result<PathBuf, AppError> {
    ensure_parent(link)?;
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)?;
    #[cfg(windows)]
    std::os::windows::fs::symlink_file(target, link)?;
    #[cfg(not(any(unix, windows)))]
    return Err(AppError::General(
        "symlinks are not supported on this platform".to_string(),
    ));

    #[cfg(any(unix, windows))]
    Ok(link.to_path_buf())
}

/// Writes an Internet Shortcut (`.url`) pointing at `target`.
pub fn create_url_shortcut(target: &Path, link: &Path) -> Result<PathBuf, AppError> {
    let path = with_suffix(link, "url");
    ensure_parent(&path)?;
    fs::write(&path, format!("[InternetShortcut]\nURL={}\n", file_url(target)))?;
    Ok(path)
}

/// Writes a freedesktop `.desktop` link entry pointing at `target`.
pub fn create_desktop_shortcut(target: &Path, link: &Path) -> Result<PathBuf, AppError> {
    let path = with_suffix(link, "desktop");
    ensure_parent(&path)?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    fs::write(
        &path,
        format!(
            "[Desktop Entry]\nType=Link\nName={name}\nURL={}\n",
            file_url(target)
        ),
    )?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = fs::set_permissions(&path, fs::Permissions::from_mode(0o755)) {
            tracing::debug!(path = %path.display(), error = %err, "could not mark desktop entry executable");
        }
    }
    Ok(path)
}

/// Creates a shortcut at `link` to `target`. `Auto` tries a symlink first
/// and falls back to a `.url` file. Returns where the shortcut landed and
/// which mechanism was used.
pub fn create_shortcut(
    target: &Path,
    link: &Path,
    kind: ShortcutKind,
) -> Result<(PathBuf, CreatedShortcut), AppError> {
    match kind {
        ShortcutKind::Symlink => Ok((create_symlink(target, link)?, CreatedShortcut::Symlink)),
        ShortcutKind::Url => Ok((create_url_shortcut(target, link)?, CreatedShortcut::Url)),
        ShortcutKind::Desktop => Ok((
            create_desktop_shortcut(target, link)?,
            CreatedShortcut::Desktop,
        )),
        ShortcutKind::Auto => match create_symlink(target, link) {
            Ok(path) => Ok((path, CreatedShortcut::Symlink)),
            Err(err) => {
                tracing::debug!(link = %link.display(), error = %err, "symlink failed, writing .url shortcut");
                Ok((create_url_shortcut(target, link)?, CreatedShortcut::Url))
            }
        },
    }
}
