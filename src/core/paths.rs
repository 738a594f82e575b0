//! Shared path helpers: home-directory resolution and path normalization.

use std::env;
use std::path::{Component, Path, PathBuf};

/// The user's home directory, if `HOME` is set to a non-empty value.
pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

/// Path sampled when no mounts are configured.
///
/// Prefers the home directory: on some platforms `/` is a sealed read-only
/// system volume whose statistics do not reflect writable usage. Falls back to
/// `/` when `HOME` is unset or does not exist.
pub fn default_sample_path() -> PathBuf {
    home_dir()
        .filter(|home| home.is_dir())
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Per-user data directory (`$HOME/.local/share/spacewarden`, or `/tmp/spacewarden`).
pub fn data_dir() -> PathBuf {
    home_dir().map_or_else(
        || {
            eprintln!("[SPW-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp").join("spacewarden")
        },
        |home| home.join(".local").join("share").join("spacewarden"),
    )
}

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components. Otherwise the path is made absolute relative to
/// CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
