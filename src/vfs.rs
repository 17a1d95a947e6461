use crate::error::GatewayError;
use crate::sandbox;
use std::path::Path;
use tracing::debug;

/// A file resolved and loaded on behalf of one asset request.
#[derive(Debug)]
pub struct ServedAsset {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Serve `requested_path` from under `root`, falling back to `entry_file`
/// when the request names the mount itself. Sandbox rejections surface as
/// [`GatewayError::PathRejected`] before any filesystem access; everything
/// else that cannot be served as a regular file is a plain `NotFound`.
pub async fn serve(
    root: &Path,
    requested_path: &str,
    entry_file: &str,
) -> Result<ServedAsset, GatewayError> {
    let trimmed = requested_path.trim_matches('/');
    let effective = if trimmed.is_empty() { entry_file } else { trimmed };

    let resolved = sandbox::resolve(root, effective)?;
    debug!(requested = %requested_path, resolved = %resolved.display(), "Serving asset");

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|_| GatewayError::NotFound)?;
    if !metadata.is_file() {
        return Err(GatewayError::NotFound);
    }

    let bytes = tokio::fs::read(&resolved)
        .await
        .map_err(|_| GatewayError::NotFound)?;
    let content_type = mime_guess::from_path(&resolved)
        .first_or_octet_stream()
        .to_string();

    Ok(ServedAsset {
        bytes,
        content_type,
    })
}
