//! Path containment under a trusted root
//!
//! Every path built from configuration or user input goes through
//! [`secure_join`] or [`ensure_within`] before it is used for execution or
//! file access. Both work lexically, so they are safe to call on paths that
//! do not exist yet.

use crate::error::PathError;
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. A `..` at the root of an absolute path stays at the
/// root; leading `..` of a relative path is kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    let mut out = PathBuf::new();
    for part in parts {
        out.push(part.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// True when `value` carries NUL, CR or LF
pub fn has_control_characters(value: &str) -> bool {
    value.contains(['\0', '\n', '\r'])
}

/// Join `user_path` onto `root`, rejecting any result outside the root.
///
/// Absolute user paths are re-rooted under `root` rather than replacing it.
/// An empty user path yields the cleaned root.
pub fn secure_join(root: &Path, user_path: impl AsRef<Path>) -> Result<PathBuf, PathError> {
    let root_str = root.to_string_lossy();
    if root_str.trim().is_empty() {
        return Err(PathError::EmptyRoot);
    }
    let clean_root = normalize(root);

    let user_path = user_path.as_ref();
    let user_str = user_path.to_string_lossy();
    if has_control_characters(&user_str) {
        return Err(PathError::ControlCharacters(user_str.into_owned()));
    }
    if user_str.trim().is_empty() {
        return Ok(clean_root);
    }

    let relative: PathBuf = normalize(user_path)
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();

    let candidate = normalize(&clean_root.join(&relative));
    if !candidate.starts_with(&clean_root) {
        return Err(PathError::EscapesRoot {
            root: clean_root,
            path: candidate,
        });
    }
    Ok(candidate)
}

/// Make `path` absolute and normalized, then require it to be inside `root`
/// (also made absolute). Returns the cleaned absolute path.
pub fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf, PathError> {
    if root.to_string_lossy().trim().is_empty() {
        return Err(PathError::EmptyRoot);
    }
    let path_str = path.to_string_lossy();
    if has_control_characters(&path_str) {
        return Err(PathError::ControlCharacters(path_str.into_owned()));
    }

    let abs_root = absolute(root)?;
    let abs_path = absolute(path)?;
    if !abs_path.starts_with(&abs_root) {
        return Err(PathError::EscapesRoot {
            root: abs_root,
            path: abs_path,
        });
    }
    Ok(abs_path)
}

/// Absolute, lexically normalized form of `path`
pub fn absolute(path: &Path) -> Result<PathBuf, PathError> {
    let abs = std::path::absolute(path).map_err(|e| PathError::Unresolvable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(normalize(&abs))
}
