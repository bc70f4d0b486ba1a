use std::path::{Component, Path};

use crate::TransferError;

/// Validates an upload destination path.
///
/// Destinations are server paths like `/docs/report.pdf`, with a trailing
/// `/` for directory markers. A leading slash is fine; rejected are:
/// - Empty paths (including a bare `/`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
pub fn validate_destination(dest: &str) -> Result<(), TransferError> {
    let trimmed = dest.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TransferError::InvalidDestination("empty path".into()));
    }

    for component in Path::new(trimmed).components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidDestination(format!(
                    "parent directory traversal not allowed: {dest}"
                )));
            }
            Component::Prefix(_) => {
                return Err(TransferError::InvalidDestination(format!(
                    "path prefix not allowed: {dest}"
                )));
            }
            Component::RootDir | Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
