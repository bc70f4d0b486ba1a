//! Local tree scanning for folder uploads.
//!
//! Recursively walks a directory and produces upload requests: one
//! directory marker per subdirectory (empty ones included) and one file
//! request per regular file, with destination paths normalized to
//! forward slashes.

use std::path::Path;

use skylift_transfer::ByteSource;

use crate::error::UploadError;
use crate::types::UploadRequest;

/// Scans a directory recursively into upload requests.
///
/// Destination paths are `dest_prefix` joined with each entry's path
/// relative to `root`, using `/` as separator (even on Windows).
/// Markers for subdirectories come before the files inside them, so
/// submitting the requests in order creates parents first.
pub fn scan_tree(root: &Path, dest_prefix: &str) -> Result<Vec<UploadRequest>, UploadError> {
    let mut requests = Vec::new();
    walk_dir(root, root, dest_prefix, &mut requests)?;
    Ok(requests)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    dest_prefix: &str,
    requests: &mut Vec<UploadRequest>,
) -> Result<(), UploadError> {
    let entries = std::fs::read_dir(current)?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;

        // Normalize to forward slashes.
        let rel_str = rel_path.to_string_lossy().replace('\\', "/");
        let dest = join_dest(dest_prefix, &rel_str);

        if metadata.is_dir() {
            requests.push(UploadRequest {
                path: format!("{dest}/"),
                source: ByteSource::Directory,
                overwrite: false,
            });
            walk_dir(root, &path, dest_prefix, requests)?;
        } else if metadata.is_file() {
            requests.push(UploadRequest {
                path: dest,
                source: ByteSource::File {
                    path,
                    size: metadata.len(),
                },
                overwrite: false,
            });
        }
    }

    Ok(())
}

fn join_dest(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}

/// Checks a set of requests against an existing remote listing.
///
/// A folder upload collides when its top-level entry name is already
/// taken; a plain file collides on an exact name match. Returns `true`
/// when any request collides, so the caller can ask about overwriting
/// before submitting anything.
pub fn check_conflict(requests: &[UploadRequest], existing: &[String]) -> bool {
    requests.iter().any(|request| {
        let trimmed = request.path.trim_matches('/');
        let top = trimmed.split('/').next().unwrap_or(trimmed);
        existing.iter().any(|name| name == top)
    })
}
