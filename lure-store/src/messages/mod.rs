use std::path::{Component, Path};

use crate::error::{Result, StoreError};

pub mod file;
pub mod memory;

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// Reject store paths that traverse upwards or point into system directories.
pub(crate) fn validate_path(path: &Path) -> Result<()> {
    let invalid = |reason: &str| StoreError::InvalidPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }

    if path.components().any(|c| c == Component::ParentDir) {
        return Err(invalid("path cannot contain '..' components"));
    }

    if let Some(prefix) = SENSITIVE_PREFIXES.iter().find(|prefix| path.starts_with(prefix)) {
        return Err(invalid(&format!("path cannot be inside system directory {prefix}")));
    }

    Ok(())
}

/// Newest-first window over an already sorted slice.
pub(crate) fn window<T: Clone>(items: &[T], limit: usize, offset: usize) -> Vec<T> {
    items.iter().skip(offset).take(limit).cloned().collect()
}
