//! Default path derivation.

use std::path::PathBuf;
use std::sync::LazyLock;

use directories::ProjectDirs;

/// Project directories for moorage
static PROJECT_DIRS: LazyLock<Option<ProjectDirs>> =
    LazyLock::new(|| ProjectDirs::from("com", "moorage", "moorage"));

/// The default cache directory for local instances of upstream repositories.
///
/// Uses the platform cache location when available, falling back to
/// `~/.moorage`.
pub fn default_cache_dir() -> PathBuf {
    if let Some(dirs) = PROJECT_DIRS.as_ref() {
        return dirs.cache_dir().to_path_buf();
    }
    dirs_fallback()
}

fn dirs_fallback() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".moorage"))
        .unwrap_or_else(|| PathBuf::from(".moorage"))
}
