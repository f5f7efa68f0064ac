//! Path normalization utilities.

use std::path::{Component, Path, PathBuf};

/// Expand ~ to the home directory.
pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.display().to_string();
        }
    }
    path.to_string()
}

/// Check if a path contains characters `glob::Pattern` interprets.
pub fn contains_glob_chars(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

/// Check if a path uses `{a,b}` alternation, which `glob::Pattern` does not support.
pub fn contains_brace_alternation(path: &str) -> bool {
    path.find('{')
        .and_then(|open| path[open..].find('}').map(|close| &path[open..open + close]))
        .map_or(false, |group| group.contains(','))
}

/// Normalize a path without touching the filesystem.
///
/// `.` components are dropped and `..` pops the previous normal component.
/// A `..` directly below the root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match result.components().next_back() {
                Some(Component::Normal(_)) => {
                    result.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => result.push(".."),
            },
            other => result.push(other.as_os_str()),
        }
    }
    result
}

/// Resolve a path to an absolute, lexically normalized path.
///
/// Relative paths are resolved against the current working directory.
/// Symlinks are not followed, so the result describes the path the caller
/// asked for rather than its target.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty path",
        ));
    }
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(normalize_lexically(&joined))
}
