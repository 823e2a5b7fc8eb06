// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project path validation.
//!
//! Rules, evaluated in order: the candidate must be syntactically
//! absolute, must not traverse upward, must resolve to an existing
//! directory, and must not equal or nest with any registered project
//! path. Nesting is compared on path components, so `/a/b` does not
//! collide with `/a/bc`.

use crate::error::ServerError;
use std::path::{Component, Path, PathBuf};

/// Lexically clean an absolute path: drop `.` components, reject `..`.
pub fn clean_components(path: &Path) -> Result<PathBuf, ServerError> {
    if !path.is_absolute() {
        return Err(ServerError::InvalidPath(format!(
            "path must be absolute: {}",
            path.display()
        )));
    }

    let mut cleaned = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                return Err(ServerError::InvalidPath(format!(
                    "path must not contain '..': {}",
                    path.display()
                )));
            }
            Component::CurDir => {}
            other => cleaned.push(other.as_os_str()),
        }
    }
    Ok(cleaned)
}

/// Whether `prefix` is a directory-component prefix of `path`.
///
/// Equal paths count as a prefix. The comparison is component-wise, not
/// a raw string prefix.
pub fn is_component_prefix(prefix: &Path, path: &Path) -> bool {
    let mut prefix_comps = prefix.components();
    let mut path_comps = path.components();

    loop {
        match (prefix_comps.next(), path_comps.next()) {
            (None, _) => return true,
            (Some(_), None) => return false,
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
    }
}

/// Validate a candidate project path against the registered set.
///
/// Returns the cleaned path on success.
pub fn validate_project_path(
    candidate: &str,
    registered: &[PathBuf],
) -> Result<PathBuf, ServerError> {
    let cleaned = clean_components(Path::new(candidate))?;

    if !cleaned.is_dir() {
        return Err(ServerError::InvalidPath(format!(
            "path does not exist or is not a directory: {}",
            cleaned.display()
        )));
    }

    for existing in registered {
        if is_component_prefix(existing, &cleaned) || is_component_prefix(&cleaned, existing) {
            return Err(ServerError::ProjectNesting(format!(
                "{} conflicts with registered path {}",
                cleaned.display(),
                existing.display()
            )));
        }
    }

    Ok(cleaned)
}

#[cfg(test)]
#[path = "path_tests.rs"]
mod tests;
