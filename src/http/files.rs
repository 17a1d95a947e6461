use super::{error_envelope, ok_empty, ok_envelope, SharedState};
use crate::error::GatewayError;
use crate::session::SessionHandle;
use crate::transport::SshConnection;
use axum::extract::{Multipart, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const MIN_SESSION_ID_LEN: usize = 10;

#[derive(Debug, Deserialize)]
pub(super) struct RemotePathParams {
    pub session_id: String,
    pub path: String,
}

/// Every file operation rides the named session's connection over a fresh
/// ephemeral channel; the lookup mirrors the bridge's session steps.
fn session_handle(
    state: &SharedState,
    session_id: &str,
) -> Result<Arc<SessionHandle<SshConnection>>, GatewayError> {
    if session_id.len() < MIN_SESSION_ID_LEN {
        return Err(GatewayError::Validation(
            "session_id must be at least 10 characters".to_string(),
        ));
    }
    let handle = state
        .registry
        .load(session_id)
        .ok_or(GatewayError::SessionNotFound)?;
    if handle.is_closed() {
        return Err(GatewayError::ConnectionInvalid);
    }
    handle.touch();
    Ok(handle)
}

pub(super) async fn create_dir(
    State(state): State<SharedState>,
    Json(params): Json<RemotePathParams>,
) -> Json<Value> {
    let result = async {
        let handle = session_handle(&state, &params.session_id)?;
        state
            .files
            .create_dir(&*handle.connection, &params.path)
            .await
    }
    .await;

    match result {
        Ok(()) => ok_empty(),
        Err(err) => error_envelope(&err),
    }
}

pub(super) async fn list(
    State(state): State<SharedState>,
    Json(params): Json<RemotePathParams>,
) -> Json<Value> {
    let result = async {
        let handle = session_handle(&state, &params.session_id)?;
        state.files.list(&*handle.connection, &params.path).await
    }
    .await;

    match result {
        Ok(entries) => ok_envelope(entries),
        Err(err) => error_envelope(&err),
    }
}

/// File bytes with attachment disposition. Errors still come back as the
/// JSON envelope, matching every other endpoint.
pub(super) async fn download(
    State(state): State<SharedState>,
    Query(params): Query<RemotePathParams>,
) -> Response {
    let result = async {
        let handle = session_handle(&state, &params.session_id)?;
        state
            .files
            .read_file(&*handle.connection, &params.path)
            .await
    }
    .await;

    match result {
        Ok(bytes) => {
            state
                .audit
                .log(
                    "sftp_download",
                    json!({"session_id": params.session_id, "path": params.path}),
                )
                .await;
            let filename = params
                .path
                .rsplit('/')
                .next()
                .filter(|name| !name.is_empty())
                .unwrap_or("download");
            let content_type = mime_guess::from_path(filename)
                .first_or_octet_stream()
                .to_string();
            (
                [
                    (header::CONTENT_TYPE, content_type),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(err) => error_envelope(&err).into_response(),
    }
}

/// Multipart upload: `session_id` and `path` text fields plus one file
/// field. The bytes are base64-framed onto the remote over an exec channel.
pub(super) async fn upload(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Json<Value> {
    let mut session_id = None;
    let mut path = None;
    let mut content: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(_) => {
                return error_envelope(&GatewayError::Validation(
                    "malformed multipart body".to_string(),
                ))
            }
        };
        match field.name() {
            Some("session_id") => session_id = field.text().await.ok(),
            Some("path") => path = field.text().await.ok(),
            Some("file") => content = field.bytes().await.ok().map(|b| b.to_vec()),
            _ => {}
        }
    }

    let (Some(session_id), Some(path), Some(content)) = (session_id, path, content) else {
        return error_envelope(&GatewayError::Validation(
            "upload requires session_id, path, and file fields".to_string(),
        ));
    };

    let result = async {
        let handle = session_handle(&state, &session_id)?;
        state
            .files
            .write_file(&*handle.connection, &path, &content)
            .await
    }
    .await;

    match result {
        Ok(()) => {
            state
                .audit
                .log(
                    "sftp_upload",
                    json!({"session_id": session_id, "path": path, "bytes": content.len()}),
                )
                .await;
            ok_empty()
        }
        Err(err) => error_envelope(&err),
    }
}

pub(super) async fn delete(
    State(state): State<SharedState>,
    Json(params): Json<RemotePathParams>,
) -> Json<Value> {
    let result = async {
        let handle = session_handle(&state, &params.session_id)?;
        state.files.delete(&*handle.connection, &params.path).await
    }
    .await;

    match result {
        Ok(()) => {
            state
                .audit
                .log(
                    "sftp_delete",
                    json!({"session_id": params.session_id, "path": params.path}),
                )
                .await;
            ok_empty()
        }
        Err(err) => error_envelope(&err),
    }
}
