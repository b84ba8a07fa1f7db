//! Path handling for the inventory tree
//!
//! Paths are absolute and `/`-separated: `/` is the root folder,
//! `/docs/report.txt` a file inside the `docs` folder.

use super::{EntryRef, FolderEntry};
use crate::error::{ArchiveError, Result};

/// Split an absolute path into its segments (`/` yields no segments)
pub fn split(path: &str) -> Result<Vec<&str>> {
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| ArchiveError::InvalidPath(path.to_string()))?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let segments: Vec<&str> = rest.split('/').collect();
    for segment in &segments {
        validate_name(segment).map_err(|_| ArchiveError::InvalidPath(path.to_string()))?;
    }
    Ok(segments)
}

/// Check that a single entry name is usable
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(ArchiveError::InvalidPath(name.to_string()));
    }
    Ok(())
}

/// The parent folder's path
pub fn dirname(path: &str) -> Result<String> {
    let segments = split(path)?;
    match segments.split_last() {
        None => Err(ArchiveError::InvalidPath(path.to_string())),
        Some((_, parents)) if parents.is_empty() => Ok("/".to_string()),
        Some((_, parents)) => Ok(format!("/{}", parents.join("/"))),
    }
}

/// The last segment of the path
pub fn basename(path: &str) -> Result<&str> {
    split(path)?
        .last()
        .copied()
        .ok_or_else(|| ArchiveError::InvalidPath(path.to_string()))
}

/// Path of the child `name` inside the folder at `parent`
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

/// True if `inner` equals `outer` or lies below it
pub fn is_within(outer: &str, inner: &str) -> Result<bool> {
    let outer = split(outer)?;
    let inner = split(inner)?;
    Ok(inner.len() >= outer.len() && inner[..outer.len()] == outer[..])
}

fn prefix(segments: &[&str], n: usize) -> String {
    format!("/{}", segments[..n].join("/"))
}

/// Resolve a path against the tree
///
/// Fails with `NotFound` on the first unmatched segment and with
/// `NotAFolder` when a non-terminal segment names a file.
pub fn traverse<'a>(root: &'a FolderEntry, path: &str) -> Result<EntryRef<'a>> {
    let segments = split(path)?;
    let mut current = EntryRef::Folder(root);

    for (i, segment) in segments.iter().enumerate() {
        let folder = match current {
            EntryRef::Folder(folder) => folder,
            EntryRef::File(_) => {
                return Err(ArchiveError::NotAFolder {
                    path: prefix(&segments, i),
                })
            }
        };
        current = folder
            .child(segment)
            .ok_or_else(|| ArchiveError::NotFound {
                path: prefix(&segments, i + 1),
            })?;
    }

    Ok(current)
}

/// Resolve a path that must name a folder, mutably
pub fn traverse_folder_mut<'a>(root: &'a mut FolderEntry, path: &str) -> Result<&'a mut FolderEntry> {
    let segments = split(path)?;
    let mut current = root;

    for (i, segment) in segments.iter().enumerate() {
        if current.has_file(segment) {
            return Err(ArchiveError::NotAFolder {
                path: prefix(&segments, i + 1),
            });
        }
        current = current
            .folder_mut(segment)
            .ok_or_else(|| ArchiveError::NotFound {
                path: prefix(&segments, i + 1),
            })?;
    }

    Ok(current)
}
