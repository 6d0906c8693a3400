//! Helpers for the '/'-separated node namespace.

use crate::NodeError;
use crate::Result;

/// Checks that `path` is an absolute node path.
///
/// A sequential base path may end with '/', in which case the server-assigned
/// suffix becomes the whole final segment.
pub fn validate_path(
    path: &str,
    sequential: bool,
) -> Result<()> {
    let invalid = |reason: &'static str| -> Result<()> {
        Err(NodeError::InvalidPath {
            path: path.to_string(),
            reason,
        }
        .into())
    };

    if path.is_empty() {
        return invalid("path must not be empty");
    }
    if !path.starts_with('/') {
        return invalid("path must start with '/'");
    }
    if path.len() == 1 {
        return if sequential {
            invalid("sequential base path must name a parent")
        } else {
            Ok(())
        };
    }
    if path.contains('\0') {
        return invalid("path must not contain NUL characters");
    }

    let body = if sequential {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    };
    if body.ends_with('/') {
        return invalid("path must not end with '/'");
    }

    for segment in body[1..].split('/') {
        match segment {
            "" => return invalid("path must not contain empty segments"),
            "." | ".." => return invalid("relative segments are not allowed"),
            _ => {}
        }
    }

    Ok(())
}

/// Parent of an absolute path; `None` for the root.
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Final segment of an absolute path.
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Joins a parent path and a child name.
pub fn child_path(
    parent: &str,
    name: &str,
) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
