use super::{error_envelope, ok_empty, ok_envelope, SharedState};
use crate::config::expand_path;
use crate::error::GatewayError;
use crate::session::{Endpoint, SessionHandle, TerminalInput};
use crate::transport::{ConnectParams, RemoteConnection, SshConnection};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::Json;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const MIN_SESSION_ID_LEN: usize = 10;

fn default_port() -> u16 {
    22
}

fn default_cols() -> u32 {
    80
}

fn default_rows() -> u32 {
    24
}

#[derive(Debug, Deserialize)]
pub(super) struct ConnParams {
    pub session_id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub private_key_path: Option<String>,
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default = "default_rows")]
    pub rows: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ResizeParams {
    pub session_id: String,
    pub cols: u32,
    pub rows: u32,
}

#[derive(Debug, Deserialize)]
pub(super) struct ExecParams {
    pub session_id: String,
    pub cmd: String,
}

/// Issues a fresh opaque session id for a caller that wants the server to
/// pick one. UUIDs comfortably satisfy the minimum-length rule.
pub(super) async fn create_session() -> Json<Value> {
    ok_envelope(json!({"session_id": Uuid::new_v4().to_string()}))
}

/// Websocket terminal: establishes the persistent SSH connection after the
/// upgrade, registers the session, then pumps shell output to binary frames
/// and frames back to shell input. Establishment failures are reported as a
/// text frame followed by close; the session is never registered.
pub(super) async fn connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnParams>,
    State(state): State<SharedState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_terminal(socket, state, params))
}

async fn handle_terminal(socket: WebSocket, state: SharedState, params: ConnParams) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let handle = match establish(&state, &params).await {
        Ok(handle) => handle,
        Err(err) => {
            let _ = ws_tx
                .send(Message::Text(format!(
                    "connection failed: {}",
                    err.public_message()
                )))
                .await;
            let _ = ws_tx
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "connection failed".into(),
                })))
                .await;
            return;
        }
    };

    // The attachment is always present on handles built here.
    let Some(terminal) = handle.terminal.clone() else {
        return;
    };
    let mut output_rx = terminal.output.subscribe();

    loop {
        tokio::select! {
            out = output_rx.recv() => {
                match out {
                    Ok(bytes) => {
                        if ws_tx.send(Message::Binary(bytes.to_vec())).await.is_err() {
                            break;
                        }
                    }
                    // Closed means the remote shell ended.
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        handle.touch();
                        if terminal.input.send(TerminalInput::Data(Bytes::from(data))).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle.touch();
                        if terminal.input.send(TerminalInput::Data(Bytes::from(text))).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Teardown; the disconnect endpoint or the sweeper may have beaten us to
    // the delete, in which case the transport is already being torn down.
    if let Some(handle) = state.registry.delete(&params.session_id) {
        handle.mark_closed();
        handle.connection.disconnect().await;
    }
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "session closed".into(),
        })))
        .await;

    state
        .audit
        .log(
            "session_close",
            json!({"session_id": params.session_id, "host": params.host}),
        )
        .await;
}

async fn establish(
    state: &SharedState,
    params: &ConnParams,
) -> Result<Arc<SessionHandle<SshConnection>>, GatewayError> {
    if params.session_id.len() < MIN_SESSION_ID_LEN {
        return Err(GatewayError::Validation(
            "session_id must be at least 10 characters".to_string(),
        ));
    }
    if state.registry.load(&params.session_id).is_some() {
        return Err(GatewayError::Validation(
            "session_id is already in use".to_string(),
        ));
    }

    let private_key_path = match &params.private_key_path {
        Some(raw) => Some(
            expand_path(raw)
                .map_err(|_| GatewayError::Validation("invalid private_key_path".to_string()))?
                .to_string_lossy()
                .into_owned(),
        ),
        None => None,
    };

    let connection = SshConnection::connect(
        &ConnectParams {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
            password: params.password.clone(),
            private_key_path,
        },
        Duration::from_secs(state.config.ssh_connect_timeout_secs),
    )
    .await?;

    let terminal = match connection.open_terminal(params.cols, params.rows).await {
        Ok(terminal) => terminal,
        Err(err) => {
            connection.disconnect().await;
            return Err(err);
        }
    };

    let handle = Arc::new(SessionHandle::new(
        params.session_id.clone(),
        Arc::new(connection),
        Endpoint {
            host: params.host.clone(),
            port: params.port,
            username: params.username.clone(),
        },
        Some(terminal),
    ));

    // A concurrent connect with the same id may have won the race since the
    // check above; the loser's connection is torn down, not the winner's.
    if !state.registry.store(handle.clone()) {
        handle.connection.disconnect().await;
        return Err(GatewayError::Validation(
            "session_id is already in use".to_string(),
        ));
    }

    state
        .audit
        .log(
            "session_open",
            json!({
                "session_id": params.session_id,
                "host": params.host,
                "port": params.port,
                "username": params.username,
            }),
        )
        .await;

    Ok(handle)
}

/// Window-change on the session's shell channel.
pub(super) async fn resize(
    State(state): State<SharedState>,
    Json(params): Json<ResizeParams>,
) -> Json<Value> {
    match resize_inner(&state, &params).await {
        Ok(()) => ok_empty(),
        Err(err) => error_envelope(&err),
    }
}

async fn resize_inner(state: &SharedState, params: &ResizeParams) -> Result<(), GatewayError> {
    let handle = state
        .registry
        .load(&params.session_id)
        .ok_or(GatewayError::SessionNotFound)?;
    if handle.is_closed() {
        return Err(GatewayError::ConnectionInvalid);
    }
    handle.touch();

    let terminal = handle
        .terminal
        .as_ref()
        .ok_or(GatewayError::ConnectionInvalid)?;
    terminal
        .input
        .send(TerminalInput::Resize {
            cols: params.cols,
            rows: params.rows,
        })
        .await
        .map_err(|_| GatewayError::ConnectionInvalid)
}

/// One-shot command on an ephemeral channel of the named session. Same
/// mechanics as the plugin bridge, without a plugin identity.
pub(super) async fn exec(
    State(state): State<SharedState>,
    Json(params): Json<ExecParams>,
) -> Json<Value> {
    state
        .audit
        .log(
            "ssh_exec",
            json!({"session_id": params.session_id, "cmd": params.cmd}),
        )
        .await;

    match state
        .bridge
        .run_on_session(&params.session_id, &params.cmd)
        .await
    {
        Ok(out) => ok_envelope(String::from_utf8_lossy(&out.output)),
        Err(err) => error_envelope(&err),
    }
}

/// Registry delete plus graceful transport teardown. Never waits for
/// in-flight bridge calls on the same connection.
pub(super) async fn disconnect(
    State(state): State<SharedState>,
    Json(params): Json<SessionRef>,
) -> Json<Value> {
    match state.registry.delete(&params.session_id) {
        Some(handle) => {
            handle.mark_closed();
            handle.connection.disconnect().await;
            state
                .audit
                .log("session_disconnect", json!({"session_id": params.session_id}))
                .await;
            ok_empty()
        }
        None => error_envelope(&GatewayError::SessionNotFound),
    }
}

pub(super) async fn online_clients(State(state): State<SharedState>) -> Json<Value> {
    let mut clients: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .map(|handle| {
            json!({
                "session_id": handle.session_id,
                "host": handle.endpoint.host,
                "port": handle.endpoint.port,
                "username": handle.endpoint.username,
                "connected_at": handle.created_at.to_rfc3339(),
                "last_active": handle.last_active().to_rfc3339(),
            })
        })
        .collect();
    clients.sort_by(|a, b| a["connected_at"].as_str().cmp(&b["connected_at"].as_str()));
    ok_envelope(clients)
}

pub(super) async fn refresh_conn_time(
    State(state): State<SharedState>,
    Json(params): Json<SessionRef>,
) -> Json<Value> {
    match state.registry.load(&params.session_id) {
        Some(handle) => {
            handle.touch();
            ok_empty()
        }
        None => error_envelope(&GatewayError::SessionNotFound),
    }
}
