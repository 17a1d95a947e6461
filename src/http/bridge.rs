use super::{error_envelope, ok_envelope, SharedState};
use crate::bridge::BridgeRequest;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub(super) struct ExecSshParams {
    pub plugin_id: String,
    pub session_id: String,
    pub cmd: String,
}

/// `POST /api/plugin/exec_ssh`: the plugin command bridge. Always HTTP 200;
/// the in-body code carries the outcome, and `CommandFailed` responses keep
/// whatever output the remote produced before failing.
pub(super) async fn exec_ssh(
    State(state): State<SharedState>,
    Json(params): Json<ExecSshParams>,
) -> Json<Value> {
    state
        .audit
        .log(
            "bridge_exec",
            json!({
                "plugin_id": params.plugin_id,
                "session_id": params.session_id,
                "cmd": params.cmd,
            }),
        )
        .await;

    let req = BridgeRequest {
        plugin_id: params.plugin_id,
        session_id: params.session_id,
        cmd: params.cmd,
    };
    match state.bridge.execute(&req).await {
        Ok(out) => ok_envelope(String::from_utf8_lossy(&out.output)),
        Err(err) => error_envelope(&err),
    }
}
