//! Lexical path checks for archive entries.
//!
//! Entry names are normalized without touching the filesystem: every accepted
//! name maps to a relative path that stays inside the extraction root.

use std::path::{Component, Path, PathBuf};

use crate::error::IngestError;

/// Normalize an entry name to a relative path under the extraction root.
///
/// Returns `Ok(None)` for names that normalize to the root itself (`"./"`, `""`).
pub fn sanitize_entry_path(name: &str) -> Result<Option<PathBuf>, IngestError> {
    let unified = name.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(traversal(name));
    }

    let mut parts: Vec<&str> = Vec::new();
    push_components(&mut parts, &unified, name)?;

    if parts.is_empty() {
        Ok(None)
    } else {
        Ok(Some(parts.iter().collect()))
    }
}

/// Resolve a link target relative to `base` (itself relative to the root).
///
/// Fails if the target is absolute or climbs above the root.
pub fn resolve_link_target(base: &Path, target: &str, entry: &str) -> Result<PathBuf, IngestError> {
    let unified = target.replace('\\', "/");
    if is_absolute(&unified) {
        return Err(traversal(entry));
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in base.components() {
        match component {
            Component::Normal(part) => match part.to_str() {
                Some(s) => parts.push(s),
                None => return Err(traversal(entry)),
            },
            Component::CurDir => {}
            _ => return Err(traversal(entry)),
        }
    }
    push_components(&mut parts, &unified, entry)?;
    Ok(parts.iter().collect())
}

fn push_components<'a>(parts: &mut Vec<&'a str>, path: &'a str, entry: &str) -> Result<(), IngestError> {
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(traversal(entry));
                }
            }
            s => parts.push(s),
        }
    }
    Ok(())
}

fn is_absolute(unified: &str) -> bool {
    if unified.starts_with('/') {
        return true;
    }
    // Windows drive prefix: "C:" / "c:/..."
    let bytes = unified.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

fn traversal(entry: &str) -> IngestError {
    IngestError::PathTraversal {
        entry: entry.to_string(),
    }
}
