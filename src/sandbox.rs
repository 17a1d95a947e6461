use crate::error::GatewayError;
use std::path::{Path, PathBuf};

/// Resolve a slash-separated request path to a location under `root`.
///
/// The request is treated as rooted at `root` and cleaned purely lexically:
/// empty and `.` segments drop out, `..` consumes the previous segment, and a
/// `..` with nothing left to consume is a traversal attempt and is rejected.
/// The cleaned segments are then joined one by one, so no segment can carry a
/// separator past the clean. The filesystem is never consulted; a nonexistent
/// target is the caller's problem at open time.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, GatewayError> {
    // On platforms whose native separator is not '/', a native separator in
    // the request would survive the slash-based clean as part of a segment.
    if std::path::MAIN_SEPARATOR != '/' && requested.contains(std::path::MAIN_SEPARATOR) {
        return Err(GatewayError::PathRejected);
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in requested.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(GatewayError::PathRejected);
                }
            }
            other => segments.push(other),
        }
    }

    let mut resolved = root.to_path_buf();
    for segment in segments {
        resolved.push(segment);
    }

    // A pushed segment that parses as a prefix (Windows "C:") would replace
    // the path instead of extending it; the invariant check catches that.
    if !resolved.starts_with(root) {
        return Err(GatewayError::PathRejected);
    }

    Ok(resolved)
}
