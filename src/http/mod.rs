mod assets;
mod bridge;
mod files;
mod terminal;

use crate::audit::AuditLog;
use crate::bridge::CommandBridge;
use crate::config::Config;
use crate::error::GatewayError;
use crate::plugins::PluginDirectory;
use crate::session::SessionRegistry;
use crate::transport::{FileTransfer, SshConnection};
use axum::response::Redirect;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Everything the request handlers share. Constructed once in `main` and
/// passed into the router; there is no global state.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry<SshConnection>>,
    pub plugins: Arc<dyn PluginDirectory>,
    pub bridge: CommandBridge<SshConnection>,
    pub files: FileTransfer,
    pub audit: Arc<AuditLog>,
}

pub type SharedState = Arc<AppState>;

/// Every API endpoint answers HTTP 200 with an in-body numeric code
/// (0 = success); only the asset routes use real HTTP status codes.
pub(crate) fn ok_envelope(data: impl Serialize) -> Json<Value> {
    Json(json!({"code": 0, "msg": "ok", "data": data}))
}

pub(crate) fn ok_empty() -> Json<Value> {
    Json(json!({"code": 0, "msg": "ok"}))
}

pub(crate) fn error_envelope(err: &GatewayError) -> Json<Value> {
    match err {
        // The one failure that still carries data: whatever output the
        // remote command produced before failing.
        GatewayError::CommandFailed { output, .. } => Json(json!({
            "code": err.code(),
            "msg": err.public_message(),
            "data": String::from_utf8_lossy(output),
        })),
        _ => Json(json!({"code": err.code(), "msg": err.public_message()})),
    }
}

pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/app", get(assets::serve_app_index))
        .route("/app/", get(assets::serve_app_index))
        .route("/app/*path", get(assets::serve_app_asset))
        .route("/plugin/*filepath", get(assets::serve_plugin_asset))
        .route("/api/plugin", get(assets::list_plugins))
        .route("/api/plugin/exec_ssh", post(bridge::exec_ssh))
        .route("/api/ssh/create_session", post(terminal::create_session))
        .route(
            "/api/ssh/conn",
            get(terminal::connect).patch(terminal::resize),
        )
        .route("/api/ssh/exec", post(terminal::exec))
        .route("/api/ssh/disconnect", post(terminal::disconnect))
        .route(
            "/api/conn_manage/online_client",
            get(terminal::online_clients),
        )
        .route(
            "/api/conn_manage/refresh_conn_time",
            put(terminal::refresh_conn_time),
        )
        .route("/api/sftp/create_dir", post(files::create_dir))
        .route("/api/sftp/list", post(files::list))
        .route("/api/sftp/download", get(files::download))
        .route("/api/sftp/upload", put(files::upload))
        .route("/api/sftp/delete", delete(files::delete));

    let web_base_dir = state.config.web_base_dir.clone();
    let app_mount = format!("{web_base_dir}/app");

    let root = Router::new().route(
        "/web_base_dir",
        get({
            let web_base_dir = web_base_dir.clone();
            move || async move { Json(json!({"code": 0, "web_base_dir": web_base_dir})) }
        }),
    );
    let root = if web_base_dir.is_empty() {
        root.merge(api)
    } else {
        root.nest(&web_base_dir, api)
    };

    root.fallback(move || async move { Redirect::permanent(&app_mount) })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
